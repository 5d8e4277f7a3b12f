use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use sl_base::state::MessageStatus;
use storyloom::classify::is_collapsible;
use storyloom::config::CONFIG_FILE;
use storyloom::{ClientConfig, Orchestrator};

const TICK: Duration = Duration::from_millis(30);

const HELP: &str = "\
commands:
  /regen <id>          regenerate an assistant message
  /edit <id> <text>    edit a message (user messages are resent)
  /delete <id>         delete a message
  /stop                stop the current stream
  /branch <id>         branch the conversation after a message
  /branches            list saved branches
  /switch <key>        switch to a saved branch
  /blocks <id>         show classified blocks of a message
  /history             show the conversation
  /quit                exit";

struct Args {
    config: PathBuf,
    session: String,
    agent: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args { config: PathBuf::from(CONFIG_FILE), session: "default".to_string(), agent: None };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = iter.next().map(PathBuf::from).unwrap_or(args.config),
            "--session" => args.session = iter.next().unwrap_or(args.session),
            "--agent" => args.agent = iter.next(),
            other => eprintln!("ignoring unknown argument '{}'", other),
        }
    }
    args
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = parse_args();
    let config = match ClientConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {}", e);
            std::process::exit(2);
        }
    };

    // Panic hook: log the panic to disk next to the other error logs.
    let panic_dir = config.store_dir.join(sl_base::constants::ERRORS_DIR);
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = std::fs::create_dir_all(&panic_dir);
        let backtrace = std::backtrace::Backtrace::force_capture();
        let msg = format!("[{}] {}\n\n{}\n\n---\n", sl_base::shared::now_rfc3339(), info, backtrace);
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(panic_dir.join("panic.log"))
            .and_then(|mut f| f.write_all(msg.as_bytes()));
        default_hook(info);
    }));

    let mut orch = match Orchestrator::from_config(config, &args.session) {
        Ok(orch) => orch,
        Err(e) => {
            eprintln!("startup error: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(session = %args.session, branch = orch.branch(), "session started");
    println!("storyloom · session {} · branch {} · /help for commands", args.session, orch.branch());

    // stdin on its own thread so /stop works while a reply streams
    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut view = StreamView::default();
    loop {
        match line_rx.recv_timeout(TICK) {
            Ok(line) => {
                if !handle_line(&mut orch, line.trim(), args.agent.clone(), &mut view) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                orch.run_until_idle(Duration::from_secs(600));
                view.render(&orch);
                break;
            }
        }
        orch.poll();
        view.render(&orch);
    }
    orch.stop_streaming();
    Ok(())
}

/// Tracks what has been printed of the message being streamed.
#[derive(Default)]
struct StreamView {
    message_id: Option<String>,
    shown: String,
}

impl StreamView {
    fn follow(&mut self, id: String) {
        self.message_id = Some(id);
        self.shown.clear();
    }

    fn render(&mut self, orch: &Orchestrator) {
        let Some(id) = self.message_id.clone() else { return };
        let Some(msg) = orch.message(&id) else {
            self.message_id = None;
            return;
        };
        let mut out = io::stdout().lock();
        if msg.status == MessageStatus::Streaming {
            if !msg.content.starts_with(&self.shown) {
                // retried: the next attempt starts over
                let _ = writeln!(out, "\n[retrying]");
                self.shown.clear();
            }
            let _ = write!(out, "{}", &msg.content[self.shown.len()..]);
            let _ = out.flush();
            self.shown = msg.content.clone();
            return;
        }
        match msg.status {
            MessageStatus::Complete if !self.shown.is_empty() && msg.content.starts_with(&self.shown) => {
                let _ = writeln!(out, "{}", &msg.content[self.shown.len()..]);
            }
            MessageStatus::Complete | MessageStatus::Error => {
                let _ = writeln!(out, "\n{}", msg.content);
            }
            MessageStatus::Cancelled => {
                let _ = writeln!(out, "\n[stopped]");
            }
            _ => return,
        }
        let _ = writeln!(out, "[{} {:?}]", msg.id, msg.status);
        self.message_id = None;
    }
}

/// Returns false when the session should end.
fn handle_line(orch: &mut Orchestrator, line: &str, agent: Option<String>, view: &mut StreamView) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let result = match command {
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("{}", HELP);
            Ok(())
        }
        "/stop" => {
            if !orch.stop_streaming() {
                println!("nothing is streaming");
            }
            Ok(())
        }
        "/regen" => orch.regenerate_message(rest).map(|id| match id {
            Some(id) => view.follow(id),
            None => println!("nothing to regenerate from"),
        }),
        "/edit" => {
            let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
            orch.edit_message(id, text).map(|id| {
                if let Some(id) = id {
                    view.follow(id);
                }
            })
        }
        "/delete" => orch.delete_message(rest),
        "/branch" => orch.create_branch(rest).map(|key| println!("now on branch {}", key)),
        "/branches" => orch.branches().map(|keys| {
            for key in keys {
                let marker = if key == orch.branch() { "*" } else { " " };
                println!("{} {}", marker, key);
            }
        }),
        "/switch" => orch.switch_branch(rest).map(|_| print_history(orch)),
        "/history" => {
            print_history(orch);
            Ok(())
        }
        "/blocks" => {
            match orch.blocks(rest) {
                Some(blocks) => {
                    for block in blocks {
                        let collapsed = is_collapsible(block.content_type, block.content.chars().count());
                        println!("[{}{}]", block.content_type, if collapsed { ", collapsed" } else { "" });
                        if !collapsed {
                            println!("{}", block.content);
                        }
                    }
                }
                None => println!("unknown message {}", rest),
            }
            Ok(())
        }
        _ if command.starts_with('/') => {
            println!("unknown command {}, /help lists them", command);
            Ok(())
        }
        _ => orch.send_message(line, agent, 0).map(|id| view.follow(id)),
    };
    if let Err(e) = result {
        println!("error: {}", e);
    }
    true
}

fn print_history(orch: &Orchestrator) {
    for msg in orch.messages() {
        println!("[{}] {}", msg.id, msg.content);
    }
}
