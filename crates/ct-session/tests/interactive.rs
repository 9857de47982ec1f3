//! Duplex pump behavior against an in-memory server

mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use ct_protocol::{ControlFrame, TerminalSize};
use ct_session::{run_interactive, Outcome, PumpOptions, SessionError};

use common::{close_with, connection_pair, drain, next_frame, FailingInput, MockTerminal, SharedOutput};

fn no_resize() -> futures::stream::Pending<TerminalSize> {
    futures::stream::pending()
}

#[tokio::test]
async fn test_cancel_returns_promptly_and_restores() {
    let (conn, server) = connection_pair().await;
    tokio::spawn(drain(server));

    let (input, _keep_open) = tokio::io::duplex(64);
    let mut terminal = MockTerminal::default();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = run_interactive(
        conn.clone(),
        input,
        SharedOutput::default(),
        &mut terminal,
        no_resize(),
        cancel,
        &PumpOptions::default(),
    )
    .await;

    assert!(matches!(result, Ok(Outcome::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(conn.is_closed());
    assert_eq!(terminal.enabled(), 1);
    assert_eq!(terminal.restored(), 1);
}

#[tokio::test]
async fn test_server_output_then_normal_close() {
    let (conn, mut server) = connection_pair().await;
    tokio::spawn(async move {
        server
            .send(Message::Binary(b"welcome\r\n$ ".to_vec()))
            .await
            .unwrap();
        close_with(&mut server, CloseCode::Normal, "bye").await;
        drain(server).await;
    });

    let (input, _keep_open) = tokio::io::duplex(64);
    let output = SharedOutput::default();
    let mut terminal = MockTerminal::default();

    let result = run_interactive(
        conn,
        input,
        output.clone(),
        &mut terminal,
        no_resize(),
        CancellationToken::new(),
        &PumpOptions::default(),
    )
    .await;

    assert!(matches!(result, Ok(Outcome::Closed)));
    assert_eq!(output.contents(), "welcome\r\n$ ");
    assert_eq!(terminal.restored(), 1);
}

#[tokio::test]
async fn test_abnormal_close_is_an_error() {
    let (conn, mut server) = connection_pair().await;
    tokio::spawn(async move {
        close_with(&mut server, CloseCode::Error, "agent disconnected").await;
        drain(server).await;
    });

    let (input, _keep_open) = tokio::io::duplex(64);
    let mut terminal = MockTerminal::default();

    let result = run_interactive(
        conn,
        input,
        SharedOutput::default(),
        &mut terminal,
        no_resize(),
        CancellationToken::new(),
        &PumpOptions::default(),
    )
    .await;

    match result {
        Err(SessionError::AbnormalClose { code, reason }) => {
            assert_eq!(code, 1011);
            assert_eq!(reason, "agent disconnected");
        }
        other => panic!("expected abnormal close, got {other:?}"),
    }
    assert_eq!(terminal.restored(), 1);
}

#[tokio::test]
async fn test_socket_reset_is_fatal() {
    let (conn, server) = connection_pair().await;
    drop(server);

    let (input, _keep_open) = tokio::io::duplex(64);
    let mut terminal = MockTerminal::default();

    let result = run_interactive(
        conn.clone(),
        input,
        SharedOutput::default(),
        &mut terminal,
        no_resize(),
        CancellationToken::new(),
        &PumpOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::WebSocket(_))), "{result:?}");
    assert!(conn.is_closed());
    assert_eq!(terminal.restored(), 1);
}

#[tokio::test]
async fn test_input_failure_ends_session() {
    let (conn, server) = connection_pair().await;
    tokio::spawn(drain(server));

    let mut terminal = MockTerminal::default();
    let result = run_interactive(
        conn.clone(),
        FailingInput,
        SharedOutput::default(),
        &mut terminal,
        no_resize(),
        CancellationToken::new(),
        &PumpOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::Io(_))));
    assert!(conn.is_closed());
    assert_eq!(terminal.restored(), 1);
}

#[tokio::test]
async fn test_raw_mode_failure_closes_connection() {
    let (conn, server) = connection_pair().await;
    tokio::spawn(drain(server));

    let (input, _keep_open) = tokio::io::duplex(64);
    let mut terminal = MockTerminal {
        fail_enable: true,
        ..Default::default()
    };

    let result = run_interactive(
        conn.clone(),
        input,
        SharedOutput::default(),
        &mut terminal,
        no_resize(),
        CancellationToken::new(),
        &PumpOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::Io(_))));
    assert!(conn.is_closed());
    assert_eq!(terminal.restored(), 0);
}

#[tokio::test]
async fn test_keystrokes_are_forwarded_as_binary() {
    let (conn, mut server) = connection_pair().await;
    let (input, mut keyboard) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();

    let session = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut terminal = MockTerminal::default();
            run_interactive(
                conn,
                input,
                SharedOutput::default(),
                &mut terminal,
                no_resize(),
                cancel,
                &PumpOptions::default(),
            )
            .await
        }
    });

    keyboard.write_all(b"ls -la\r").await.unwrap();
    let frame = next_frame(&mut server).await.unwrap();
    assert_eq!(frame, Message::Binary(b"ls -la\r".to_vec()));

    cancel.cancel();
    assert!(matches!(session.await.unwrap(), Ok(Outcome::Cancelled)));
}

#[tokio::test]
async fn test_resize_is_forwarded_as_control_frame() {
    let (conn, mut server) = connection_pair().await;
    let (input, _keep_open) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();

    let resize = futures::stream::iter(vec![TerminalSize::new(120, 40)]).chain(no_resize());

    let session = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut terminal = MockTerminal::default();
            run_interactive(
                conn,
                input,
                SharedOutput::default(),
                &mut terminal,
                resize,
                cancel,
                &PumpOptions::default(),
            )
            .await
        }
    });

    match next_frame(&mut server).await {
        Some(Message::Text(json)) => {
            assert_eq!(
                ControlFrame::from_json(&json).unwrap(),
                ControlFrame::Resize(TerminalSize::new(120, 40))
            );
        }
        other => panic!("expected resize frame, got {other:?}"),
    }

    cancel.cancel();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keepalive_pings_are_sent() {
    let (conn, mut server) = connection_pair().await;
    let (input, _keep_open) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();

    let options = PumpOptions {
        keepalive_interval: Duration::from_millis(50),
    };
    let session = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut terminal = MockTerminal::default();
            run_interactive(
                conn,
                input,
                SharedOutput::default(),
                &mut terminal,
                no_resize(),
                cancel,
                &options,
            )
            .await
        }
    });

    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(2), next_frame(&mut server))
            .await
            .expect("no keep-alive within deadline");
        match frame {
            Some(Message::Text(json)) => {
                assert!(matches!(
                    ControlFrame::from_json(&json).unwrap(),
                    ControlFrame::Ping { ts } if ts > 0
                ));
            }
            other => panic!("expected ping frame, got {other:?}"),
        }
    }

    cancel.cancel();
    assert!(matches!(session.await.unwrap(), Ok(Outcome::Cancelled)));
}
