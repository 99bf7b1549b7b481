//! Interactive session: one connection, commands read line by line

use crate::{CliResult, Context};
use gate_controller::{ConnectionState, Motion, Notification, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  open                  open the gate
  close                 close the gate
  key <KEY>             replace the stored secure key
  reset <MASTER> <KEY>  set a new secure key on the controller
  connect               reconnect to the gate
  disconnect            drop the link
  status                show link state and stored key
  help                  this text
  quit                  leave the shell";

pub async fn run(ctx: &Context) -> CliResult {
    let (mut session, mut events) = ctx.session()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Connecting to {}...", ctx.config.device.address);
    session.start()?;
    println!("Type 'help' for commands");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        println!("Error reading input: {}", e);
                        break;
                    }
                };
                let words: Vec<&str> = line.split_whitespace().collect();

                let result = match words.as_slice() {
                    [] => Ok(()),
                    ["open"] => session.open(),
                    ["close"] => session.close(),
                    ["key", key] => session.change_key_locally(key).map(|()| {
                        println!("Secure key updated");
                    }),
                    ["reset", master, key] => session.reset_remote_key(master, key),
                    ["connect"] => session.connect(),
                    ["disconnect"] => session.disconnect(),
                    ["status"] => {
                        println!("link: {}", session.state());
                        println!("secure key: {}", session.secure_key());
                        if let Some(pending) = session.in_flight() {
                            println!("awaiting answer to {}", pending);
                        }
                        Ok(())
                    }
                    ["help"] => {
                        println!("{}", HELP);
                        Ok(())
                    }
                    ["quit"] | ["exit"] => break,
                    _ => {
                        println!("unknown command, type 'help'");
                        Ok(())
                    }
                };

                if let Err(e) = result {
                    println!("{}", input_error(&e));
                }
            }
            notification = session.next_notification(&mut events) => {
                match notification {
                    Some(Ok(n)) => show(&n),
                    Some(Err(e)) => println!("{}", answer_error(&e)),
                    None => {
                        println!("Bluetooth driver stopped");
                        break;
                    }
                }
            }
        }
    }

    let stopped = if session.is_started() {
        session.stop()
    } else {
        Ok(())
    };
    crate::shutdown(session).await;
    stopped?;
    Ok(())
}

fn show(notification: &Notification) {
    match notification {
        Notification::StateChanged(ConnectionState::Connected) => println!("Connected"),
        Notification::StateChanged(ConnectionState::Connecting) => println!("Connecting..."),
        Notification::StateChanged(ConnectionState::Disconnected) => println!("Disconnected"),
        Notification::DeviceNotFound => println!("Gate not found, try 'connect'"),
        Notification::LinkError(reason) => println!("Bluetooth error: {}", reason),
        Notification::GateMoving(Motion::Open) => println!("Opening gate"),
        Notification::GateMoving(Motion::Close) => println!("Closing gate"),
        Notification::KeyChanged(_) => println!("Secure key changed"),
        Notification::Rejected(error) => println!("Refused: {}", error),
    }
}

/// Message for a command the user typed
fn input_error(error: &SessionError) -> String {
    match error {
        SessionError::Validation(e) => format!("Invalid key: {}, try again", e),
        SessionError::NotConnected(_) => "Not connected, try 'connect'".to_string(),
        e => format!("Error: {}", e),
    }
}

/// Message for a failure while handling what the gate sent
fn answer_error(error: &SessionError) -> String {
    match error {
        SessionError::Validation(e) => {
            format!("Gate sent an unusable key ({}), key unchanged", e)
        }
        e => format!("Error handling gate answer: {}", e),
    }
}
