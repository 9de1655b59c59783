//! Facade behavior with no server to talk to: every entry point returns
//! its defined failure value instead of hanging.

use extio_client::{ClientConfig, RadioClient};

fn unreachable_cfg() -> ClientConfig {
    ClientConfig {
        server_addr: "127.0.0.1".into(),
        // Nothing listens here; connects are refused immediately.
        server_port: 1,
        log_level: 5,
        reconnect_delay_ms: 100,
        io_timeout_ms: 300,
        connect_wait_ms: 300,
        stop_wait_ms: 1_000,
    }
}

#[test]
fn entry_points_fail_fast_without_a_server() {
    let client = RadioClient::new(unreachable_cfg());

    assert!(!client.start());
    assert!(client.init_hw().is_none());
    assert_eq!(client.set_hw_lo(7_100_000), -1);
    assert_eq!(client.set_hw_lo64(7_100_000), -1);
    assert_eq!(client.get_hw_sr(), -1);
    assert_eq!(client.start_hw(7_100_000), -1);
    assert_eq!(client.get_attenuators(0), (-1, 0.0));
    assert_eq!(client.get_actual_att_idx(), -1);
    assert_eq!(client.get_agcs(0), (-1, String::new()));
    assert_eq!(client.get_srates(0), (-1, 0.0));
    assert_eq!(client.show_mgc(0), 0);
    // Void entry points are no-ops.
    client.stop_hw();
    client.version_info("host", 1, 0);
    client.show_gui();

    // OpenHW is answered locally.
    assert!(client.open_hw());

    client.stop();
    // After stop the session is gone; calls still fail cleanly.
    assert_eq!(client.set_hw_lo(1), -1);
    assert!(client.init_hw().is_none());
}
