//! Dialog correlation over a real loopback TCP connection, including the
//! resolve-then-connect path.

use extio_stream::{set_keep_alive, start_dialog, ChannelError, PacketChannel};
use extio_wire::{Message, PROTOCOL_VERSION};

use tokio::net::TcpListener;

#[tokio::test]
async fn hello_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        set_keep_alive(&stream).unwrap();
        let (dialog, mut inbound, _driver) = start_dialog(PacketChannel::new(stream));

        let request = inbound.recv().await.expect("expected hello request");
        assert_eq!(request.dialog_id, 1);
        assert!(matches!(request.msg, Message::Hello { .. }));

        dialog
            .send_response(
                Message::Hello {
                    version: Some(PROTOCOL_VERSION),
                    client_name: Some("server".into()),
                },
                request.dialog_id,
                None,
            )
            .await
            .unwrap();

        // Hold the connection open until the client has read the reply.
        let _ = inbound.recv().await;
    });

    let channel = PacketChannel::connect("localhost", port)
        .await
        .expect("resolve + connect");
    let (dialog, _inbound, driver) = start_dialog(channel);

    let reply = dialog
        .send_request(Message::Hello {
            version: Some(PROTOCOL_VERSION),
            client_name: Some("client".into()),
        })
        .await
        .unwrap();
    match reply.msg {
        Message::Hello { client_name, .. } => {
            assert_eq!(client_name.as_deref(), Some("server"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    drop(dialog);
    let _ = driver.await;
    server.await.unwrap();
}

#[tokio::test]
async fn connect_to_a_closed_port_fails() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = PacketChannel::connect("127.0.0.1", port)
        .await
        .expect_err("expected connect failure");
    assert!(matches!(err, ChannelError::Io(_)));
}
