use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, TryRecvError};
use rustyline::error::ReadlineError;

use sonify::observers::WavRecorder;
use sonify::protocol::{decode_server, encode_client, ClientMessage, ServerFrame, ServerMessage};
use sonify::Observer;


const POLL_MS: i64 = 20;


/// Interactive subscriber for a running sonify server
#[derive(Debug, Parser)]
#[command(name = "sonify-console", version)]
struct Cli {
    /// Server hub endpoint
    #[arg(long, env = "SONIFY_CONNECT", default_value = "tcp://127.0.0.1:5555")]
    connect: String,

    /// Record received audio to this WAV file
    #[arg(long)]
    record: Option<PathBuf>,
}


#[derive(Debug, PartialEq)]
enum Command {
    Send(ClientMessage),
    Watch,
    Quit,
}


fn parse_command(line: &str) -> Result<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        ["lens", name] => Command::Send(ClientMessage::SwitchLens { lens: name.to_string() }),
        ["set", name, value] => {
            let value = value.parse::<f64>().with_context(|| format!("not a number: {}", value))?;
            Command::Send(ClientMessage::SetParam { name: name.to_string(), value })
        }
        ["pause"] => Command::Send(ClientMessage::Pause),
        ["play"] => Command::Send(ClientMessage::Resume),
        ["live", "on"] => Command::Send(ClientMessage::ToggleLive { enabled: true }),
        ["live", "off"] => Command::Send(ClientMessage::ToggleLive { enabled: false }),
        ["watch"] => Command::Watch,
        ["q"] => Command::Quit,
        _ => return Err(anyhow!("commands: lens <name> | set <param> <value> | pause | play | live on|off | watch | q")),
    };
    Ok(command)
}


fn print_message(message: &ServerMessage, watching: bool) {
    match message {
        ServerMessage::Init { lens, lenses, backend, is_fallback, paused } => {
            let names: Vec<&str> = lenses.iter().map(|l| l.name.as_str()).collect();
            println!("connected: lens={} backend={} fallback={} paused={}", lens, backend, is_fallback, paused);
            println!("lenses: {}", names.join(", "));
        }
        ServerMessage::Paused { paused } => println!("paused={}", paused),
        ServerMessage::Rejected { reason } => println!("rejected: {}", reason),
        ServerMessage::LensSwitched { lens } => println!("lens switched to {}", lens),
        ServerMessage::State { controls, lens, backend, .. } if watching => println!(
            "[{}/{}] bpm={} density={:.2} brightness={:.2} guidance={:.2} scale={:?}",
            lens, backend, controls.tempo, controls.density, controls.brightness, controls.guidance, controls.scale,
        ),
        ServerMessage::State { .. } => {}
    }
}


/// Own the DEALER socket: forward queued commands out, print and record what comes back.
fn pump(
    socket: zmq::Socket,
    commands: Receiver<ClientMessage>,
    watching: Arc<AtomicBool>,
    mut recorder: Option<WavRecorder>,
) -> Result<()> {
    loop {
        loop {
            match commands.try_recv() {
                Ok(message) => socket.send(encode_client(&message)?, 0)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return match recorder {
                        Some(recorder) => {
                            println!("recorded {} frames", recorder.frames());
                            recorder.finalize()
                        }
                        None => Ok(()),
                    };
                }
            }
        }

        if socket.poll(zmq::POLLIN, POLL_MS)? == 0 {
            continue;
        }
        let parts = socket.recv_multipart(0)?;
        match decode_server(&parts) {
            Ok(ServerFrame::Message(message)) => print_message(&message, watching.load(Ordering::Relaxed)),
            Ok(ServerFrame::Audio(chunk)) => {
                if let Some(recorder) = recorder.as_mut() {
                    recorder.observe(&chunk)?;
                }
            }
            Err(err) => eprintln!("bad frame from server: {}", err),
        }
    }
}


fn main() -> Result<()> {
    let cli = Cli::parse();
    let recorder = cli.record.as_ref().map(WavRecorder::create).transpose()?;

    let context = zmq::Context::new();
    let socket = context.socket(zmq::DEALER)?;
    socket.set_linger(500)?;
    socket
        .connect(&cli.connect)
        .with_context(|| format!("failed to connect to {}", cli.connect))?;

    let (commands, outgoing) = crossbeam_channel::unbounded();
    let watching = Arc::new(AtomicBool::new(false));
    let io = {
        let watching = watching.clone();
        thread::Builder::new()
            .name("console-io".into())
            .spawn(move || pump(socket, outgoing, watching, recorder))?
    };
    commands.send(ClientMessage::Hello)?;

    let mut reader = rustyline::Editor::<()>::new()?;
    loop {
        match reader.readline("sonify> ") {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => {
                reader.add_history_entry(line.as_str());
                match parse_command(&line) {
                    Ok(Command::Send(message)) => commands.send(message)?,
                    Ok(Command::Watch) => {
                        let now = !watching.load(Ordering::Relaxed);
                        watching.store(now, Ordering::Relaxed);
                        println!("watch={}", now);
                    }
                    Ok(Command::Quit) => break,
                    Err(err) => println!("{}", err),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {:?}", err);
                break;
            }
        }
    }

    // queued messages are still delivered after the channel disconnects
    commands.send(ClientMessage::Bye)?;
    drop(commands);
    io.join().map_err(|_| anyhow!("console io thread panicked"))?
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("lens pulse").unwrap(),
            Command::Send(ClientMessage::SwitchLens { lens: "pulse".into() })
        );
        assert_eq!(
            parse_command("  set  heart_rate 90 ").unwrap(),
            Command::Send(ClientMessage::SetParam { name: "heart_rate".into(), value: 90.0 })
        );
        assert_eq!(parse_command("play").unwrap(), Command::Send(ClientMessage::Resume));
        assert_eq!(
            parse_command("live on").unwrap(),
            Command::Send(ClientMessage::ToggleLive { enabled: true })
        );
        assert_eq!(parse_command("watch").unwrap(), Command::Watch);
        assert_eq!(parse_command("q").unwrap(), Command::Quit);

        assert!(parse_command("set heart_rate fast").is_err());
        assert!(parse_command("live maybe").is_err());
        assert!(parse_command("dance").is_err());
    }
}
