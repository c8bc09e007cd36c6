use serial_test::serial;

use super::Starter;
use crate::bootstrap::Role;
use crate::config::StarterConfig;
use crate::error::StarterError;

const ENV: &str = "STARTER_API_TEST_LISTEN_FDS";

#[test]
#[serial]
fn absent_variable_means_master() {
    std::env::remove_var(ENV);
    let starter = Starter::with_config(StarterConfig::default().env_name(ENV));
    assert_eq!(starter.role(), Role::Master);
    assert!(starter.is_master());
}

#[test]
#[serial]
fn present_variable_means_worker() {
    std::env::set_var(ENV, "2");
    let starter = Starter::with_config(StarterConfig::default().env_name(ENV));
    assert_eq!(starter.role(), Role::Worker);
    assert!(!starter.is_master());
    std::env::remove_var(ENV);
}

#[test]
#[serial]
fn role_is_fixed_at_construction() {
    std::env::remove_var(ENV);
    let starter = Starter::with_config(StarterConfig::default().env_name(ENV));
    std::env::set_var(ENV, "1");
    assert_eq!(starter.role(), Role::Master);
    std::env::remove_var(ENV);
}

#[test]
#[serial]
fn master_has_no_inherited_listeners() {
    std::env::remove_var(ENV);
    let starter = Starter::with_config(StarterConfig::default().env_name(ENV));
    assert!(starter.listeners().unwrap().is_empty());
}

#[test]
#[serial]
fn signal_ready_rejects_master_role() {
    std::env::remove_var(ENV);
    let starter = Starter::with_config(StarterConfig::default().env_name(ENV));
    assert!(matches!(
        starter.signal_ready(),
        Err(StarterError::Protocol { .. })
    ));
}

#[test]
#[serial]
fn signal_ready_is_a_no_op_without_handshake() {
    std::env::remove_var(ENV);
    let starter = Starter::with_config(
        StarterConfig::default()
            .env_name(ENV)
            .readiness_handshake(false),
    );
    starter.signal_ready().unwrap();
}
