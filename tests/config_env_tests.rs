//! Environment-variable configuration loading.

use serial_test::serial;

use loadsmith::config::Config;

fn clear_env() {
    for var in [
        "BASE_URL",
        "USERS",
        "SPAWN_RATE",
        "WORKERS",
        "OPEN_TIMEOUT",
        "READ_TIMEOUT",
        "DURATION",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();
    assert_eq!(config.base_url, "http://localhost:3000");
    assert_eq!(config.users, 1);
    assert_eq!(config.duration, None);
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("BASE_URL", "https://api.example.test");
    std::env::set_var("USERS", "50");
    std::env::set_var("SPAWN_RATE", "2.5");
    std::env::set_var("WORKERS", "8");
    std::env::set_var("OPEN_TIMEOUT", "1.5");
    std::env::set_var("READ_TIMEOUT", "12");
    std::env::set_var("DURATION", "90");

    let config = Config::from_env().unwrap();
    assert_eq!(config.base_url, "https://api.example.test");
    assert_eq!(config.users, 50);
    assert_eq!(config.spawn_rate, 2.5);
    assert_eq!(config.workers, 8);
    assert_eq!(config.open_timeout, 1.5);
    assert_eq!(config.read_timeout, 12.0);
    assert_eq!(config.duration, Some(90.0));

    clear_env();
}

#[test]
#[serial]
fn test_from_env_zero_duration_means_unbounded() {
    clear_env();
    std::env::set_var("DURATION", "0");
    let config = Config::from_env().unwrap();
    assert_eq!(config.duration, None);
    clear_env();
}

#[test]
#[serial]
fn test_from_env_rejects_garbage_numbers() {
    clear_env();
    std::env::set_var("USERS", "plenty");
    assert!(Config::from_env().is_err());
    clear_env();
}

#[test]
#[serial]
fn test_from_env_rejects_out_of_range_values() {
    clear_env();
    std::env::set_var("SPAWN_RATE", "0.01");
    assert!(Config::from_env().is_err());
    clear_env();
}
