//! Remote command polling, dispatch and acknowledgement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use probelink::app::commands::ControlMsg;
use probelink::app::events::CloudEvent;
use probelink::cloud::commands::CommandType;
use probelink::cloud::dispatch::CommandResult;
use probelink::cloud::manager::SessionState;
use probelink::transport::Method;

use crate::mock_net::{BOOT_MS, Boot, Device};

fn online() -> Device {
    let mut dev = Device::boot(Boot::default());
    dev.backend.token("tok", 3600);
    dev.link_up();
    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    dev
}

fn acks(dev: &Device) -> Vec<String> {
    dev.backend
        .calls()
        .into_iter()
        .filter(|c| c.method == Method::Post && c.path.ends_with("/ack"))
        .map(|c| c.path)
        .collect()
}

#[test]
fn unknown_command_is_still_acked() {
    let mut dev = online();
    let runs = Arc::new(AtomicU32::new(0));
    let r = runs.clone();
    dev.runtime
        .cloud_mut()
        .on_named_command(
            "calibrate",
            Box::new(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                CommandResult::Success
            }),
        )
        .unwrap();

    dev.backend.reply(
        200,
        r#"{"data":[
            {"id":"cmd-1","type":"calibrate","payload":{"ppm":400}},
            {"id":"cmd-2","type":"self_destruct"}
        ]}"#,
    );
    dev.runtime.handle(ControlMsg::PollCommands);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(acks(&dev), vec!["/commands/cmd-1/ack", "/commands/cmd-2/ack"]);
    let events = dev.cloud_events();
    assert!(events.contains(&CloudEvent::CommandReceived(CommandType::Unknown)));
    assert!(events.contains(&CloudEvent::CommandProcessed(CommandType::Custom(0))));
}

#[test]
fn failed_handler_is_acked_once() {
    let mut dev = online();
    dev.runtime
        .cloud_mut()
        .on_named_command("flush", Box::new(|_| CommandResult::Failed))
        .unwrap();
    dev.backend
        .reply(200, r#"{"data":[{"id":"f1","type":"flush"}]}"#);
    dev.runtime.handle(ControlMsg::PollCommands);

    // Next poll finds nothing; the failed command is not redelivered.
    dev.runtime.handle(ControlMsg::PollCommands);
    assert_eq!(acks(&dev), vec!["/commands/f1/ack"]);
}

#[test]
fn reboot_command_restarts_from_main_loop() {
    let mut dev = online();
    dev.backend
        .reply(200, r#"{"data":[{"id":"r1","type":"reboot"}]}"#);
    dev.advance(Duration::from_secs(60));

    assert_eq!(acks(&dev), vec!["/commands/r1/ack"]);
    assert!(dev.cloud_events().contains(&CloudEvent::RebootRequested));
    assert_eq!(dev.system.restarts(), 1);
}

#[test]
fn expired_command_is_not_executed() {
    let mut dev = online();
    let body = format!(
        r#"{{"data":[{{"id":"old","type":"reboot","expires_at":{}}}]}}"#,
        BOOT_MS - 1
    );
    dev.backend.reply(200, &body);
    dev.runtime.handle(ControlMsg::PollCommands);

    assert_eq!(acks(&dev), vec!["/commands/old/ack"]);
    assert_eq!(dev.system.restarts(), 0);
}

#[test]
fn malformed_poll_keeps_session() {
    let mut dev = online();
    dev.backend.reply(200, "{not json");
    dev.runtime.handle(ControlMsg::PollCommands);

    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
    assert!(acks(&dev).is_empty());
}

#[test]
fn unauthorized_poll_reauthenticates_once() {
    let mut dev = online();
    dev.backend.reply(401, "");
    dev.backend.token("tok-2", 3600);
    dev.backend.reply(200, r#"{"data":[]}"#);
    dev.runtime.handle(ControlMsg::PollCommands);

    assert_eq!(dev.backend.count("/auth/device"), 2);
    let polls: Vec<_> = dev
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.path == "/commands?status=pending")
        .collect();
    assert_eq!(polls.len(), 2);
    assert_eq!(polls[1].authorization.as_deref(), Some("Bearer tok-2"));
    assert_eq!(dev.runtime.cloud().state(), SessionState::Authenticated);
}
