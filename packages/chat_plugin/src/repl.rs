//! Line-oriented chat front end: prints the transcript as it changes and
//! turns typed lines into session operations.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use chat_session::{
    Channel, ChatMessage, Notice, NoticeLevel, Observer, OutboundPayload, ResolutionResponse,
    Role, SessionError, SessionManager,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct ReplOptions {
    /// Print inbound messages as JSON lines.
    pub json: bool,
    /// Acknowledge inbound messages as soon as they are printed.
    pub auto_read: bool,
    /// Chat to resume instead of the stored one.
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    /// Answer button N (1-based) of the latest message that has buttons.
    Press(usize),
    Read(String),
    ReadAll,
    Unread,
    History,
    Status,
    Reconnect,
    Disconnect,
    End,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a line to send it. Commands:
  /press N      answer button N of the latest prompt
  /read ID      mark one message as read
  /read-all     mark every message as read
  /unread       list unread message ids
  /history      print the transcript
  /status       show connection state
  /reconnect    start a fresh connection
  /disconnect   close the connection
  /end          forget this chat and disconnect
  /quit         leave";

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ReplCommand::Send(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    let command = match (name, arg) {
        ("press", Some(n)) => match n.parse::<usize>() {
            Ok(n) if n > 0 => ReplCommand::Press(n),
            _ => bail!("usage: /press N (N starts at 1)"),
        },
        ("press", None) => bail!("usage: /press N"),
        ("read", Some(id)) => ReplCommand::Read(id.to_string()),
        ("read", None) => bail!("usage: /read ID"),
        ("read-all", _) => ReplCommand::ReadAll,
        ("unread", _) => ReplCommand::Unread,
        ("history", _) => ReplCommand::History,
        ("status", _) => ReplCommand::Status,
        ("reconnect", _) => ReplCommand::Reconnect,
        ("disconnect", _) => ReplCommand::Disconnect,
        ("end", _) => ReplCommand::End,
        ("help", _) | ("?", _) => ReplCommand::Help,
        ("quit", _) | ("exit", _) => ReplCommand::Quit,
        (other, _) => bail!("unknown command /{} (try /help)", other),
    };
    Ok(Some(command))
}

/// Render a message for the transcript.
pub fn format_message(msg: &ChatMessage, json: bool) -> String {
    if json {
        return serde_json::to_string(msg).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
    }

    let time = chrono::DateTime::from_timestamp_millis(msg.created_at)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "--:--:--".to_string());

    let mut out = format!("[{}] {}: {}", time, msg.role, msg.content);
    if let Some(buttons) = &msg.buttons {
        for (i, button) in buttons.iter().enumerate() {
            out.push_str(&format!("\n    [{}] {}", i + 1, button.label));
        }
    }
    out
}

/// Tracks which log entries were already shown.
#[derive(Debug, Default)]
pub struct Printer {
    shown: HashSet<String>,
    /// Content of our own sends still in flight.
    pending_own: Vec<String>,
}

impl Printer {
    /// Messages from `log` not shown yet, skipping our own sends. An empty
    /// log means the session was torn down, so the next one starts fresh.
    pub fn take_new(&mut self, log: &[ChatMessage]) -> Vec<ChatMessage> {
        if log.is_empty() {
            self.shown.clear();
            return Vec::new();
        }
        let mut fresh = Vec::new();
        for msg in log {
            if !self.shown.insert(msg.id.clone()) {
                continue;
            }
            if msg.role == Role::User && self.take_pending(&msg.content) {
                continue;
            }
            fresh.push(msg.clone());
        }
        fresh
    }

    /// We are about to send `content`; its log entry must not be echoed.
    pub fn expect_own(&mut self, content: &str) {
        self.pending_own.push(content.to_string());
    }

    /// The send of `content` finished with `sent`. A message that never
    /// reached the log (failed, or outbound recording off) stops being
    /// expected.
    pub fn settle_own(&mut self, content: &str, sent: Option<&ChatMessage>) {
        let reached_log = sent.is_some_and(|msg| !self.shown.insert(msg.id.clone()));
        if !reached_log {
            self.take_pending(content);
        }
    }

    fn take_pending(&mut self, content: &str) -> bool {
        match self.pending_own.iter().position(|c| c == content) {
            Some(pos) => {
                self.pending_own.remove(pos);
                true
            }
            None => false,
        }
    }
}

fn print_status(manager: &SessionManager) {
    println!(
        "connected: {}\nchat id: {}\nstored chat id: {}\nregistered: {}\nmessages: {} ({} unread)",
        manager.is_connected(),
        manager.current_chat_id().as_deref().unwrap_or("-"),
        manager.stored_chat_id().as_deref().unwrap_or("-"),
        manager.is_registered(),
        manager.message_count(),
        manager.unread_count(),
    );
}

/// Print new log entries whenever the Messages channel fires, and
/// acknowledge each one once printed when `auto_read` is set. Holds only a
/// weak handle, so it never keeps the manager alive.
fn watch_transcript(
    manager: &SessionManager,
    printer: Arc<Mutex<Printer>>,
    json: bool,
    auto_read: bool,
) -> Observer {
    let weak = manager.downgrade();
    manager.observe(Channel::Messages, move || {
        let Some(view) = weak.upgrade() else {
            return;
        };
        let fresh = printer.lock().take_new(&view.messages());
        for msg in fresh {
            println!("{}", format_message(&msg, json));
            if auto_read {
                let _ = view.mark_as_read(&msg.id);
            }
        }
    })
}

/// Send a payload without echoing it back into the transcript.
async fn send_own(
    manager: &SessionManager,
    printer: &Mutex<Printer>,
    payload: OutboundPayload,
) -> Result<ChatMessage, SessionError> {
    let content = payload.display_content();
    printer.lock().expect_own(&content);
    let result = manager.send(payload).await;
    printer.lock().settle_own(&content, result.as_ref().ok());
    result
}

enum Flow {
    Continue,
    Quit,
}

async fn execute(
    manager: &SessionManager,
    printer: &Mutex<Printer>,
    command: ReplCommand,
    opts: &ReplOptions,
) -> Result<Flow> {
    match command {
        ReplCommand::Send(text) => match send_own(manager, printer, text.into()).await {
            Ok(msg) => debug!("Sent {}", msg.id),
            // Already reported through the notice stream.
            Err(SessionError::NotConnected) => {}
            Err(e) => println!("error: {}", e),
        },
        ReplCommand::Press(n) => {
            let Some(prompt) = manager.latest_with_buttons() else {
                println!("nothing to answer");
                return Ok(Flow::Continue);
            };
            let buttons = prompt.buttons.unwrap_or_default();
            let Some(button) = buttons.get(n - 1) else {
                println!("no button {} (have {})", n, buttons.len());
                return Ok(Flow::Continue);
            };
            let payload: OutboundPayload = ResolutionResponse::from_button(button).into();
            match send_own(manager, printer, payload).await {
                Ok(msg) => println!("> {}", msg.content),
                Err(SessionError::NotConnected) => {}
                Err(e) => println!("error: {}", e),
            }
        }
        ReplCommand::Read(id) => manager.mark_as_read(&id)?,
        ReplCommand::ReadAll => manager.mark_all_as_read()?,
        ReplCommand::Unread => {
            manager.flush().await?;
            let unread = manager.unread();
            if unread.is_empty() {
                println!("no unread messages");
            }
            for id in unread {
                println!("{}", id);
            }
        }
        ReplCommand::History => {
            for msg in manager.chronological_messages() {
                println!("{}", format_message(&msg, opts.json));
            }
        }
        ReplCommand::Status => {
            manager.flush().await?;
            print_status(manager);
        }
        ReplCommand::Reconnect => {
            let chat_id = manager.current_chat_id().or_else(|| manager.stored_chat_id());
            manager.connect(chat_id.as_deref())?;
        }
        ReplCommand::Disconnect => manager.disconnect()?,
        ReplCommand::End => {
            manager.end_chat()?;
            println!("chat ended");
        }
        ReplCommand::Help => println!("{}", HELP),
        ReplCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Print notices until the manager goes away.
async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => match notice.level {
                NoticeLevel::Warning => eprintln!("warning: {}", notice.message),
                NoticeLevel::Error => eprintln!("error: {}", notice.message),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Skipped {} notices", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn run(manager: SessionManager, opts: ReplOptions) -> Result<()> {
    tokio::spawn(print_notices(manager.notices()));

    let weak = manager.downgrade();
    let connection = manager.observe(Channel::Connection, move || {
        match weak.upgrade() {
            Some(view) if view.is_connected() => println!("* connected"),
            Some(_) => println!("* disconnected"),
            None => {}
        }
    });

    let printer = Arc::new(Mutex::new(Printer::default()));
    let transcript = watch_transcript(&manager, printer.clone(), opts.json, opts.auto_read);

    let chat_id = opts.chat_id.clone().or_else(|| manager.stored_chat_id());
    manager.connect(chat_id.as_deref())?;
    info!("Type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if let Flow::Quit = execute(&manager, &printer, command, &opts).await? {
            break;
        }
    }

    connection.unsubscribe();
    transcript.unsubscribe();
    manager.disconnect()?;
    manager.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_session::testing::ScriptedConnector;
    use chat_session::{ActionButton, DurableState, ReconnectPolicy, SessionConfig};
    use std::time::Duration;

    // ── parse_command ───────────────────────────────────────────────────

    #[test]
    fn test_plain_lines_are_sent_trimmed() {
        assert_eq!(
            parse_command("  hello there  ").unwrap(),
            Some(ReplCommand::Send("hello there".into()))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_command("/press 2").unwrap(), Some(ReplCommand::Press(2)));
        assert_eq!(
            parse_command("/read abc").unwrap(),
            Some(ReplCommand::Read("abc".into()))
        );
        assert_eq!(parse_command("/read-all").unwrap(), Some(ReplCommand::ReadAll));
        assert_eq!(parse_command("/unread").unwrap(), Some(ReplCommand::Unread));
        assert_eq!(parse_command("/history").unwrap(), Some(ReplCommand::History));
        assert_eq!(parse_command("/status").unwrap(), Some(ReplCommand::Status));
        assert_eq!(parse_command("/reconnect").unwrap(), Some(ReplCommand::Reconnect));
        assert_eq!(parse_command("/disconnect").unwrap(), Some(ReplCommand::Disconnect));
        assert_eq!(parse_command("/end").unwrap(), Some(ReplCommand::End));
        assert_eq!(parse_command("/quit").unwrap(), Some(ReplCommand::Quit));
        assert_eq!(parse_command("/help").unwrap(), Some(ReplCommand::Help));
    }

    #[test]
    fn test_bad_commands() {
        assert!(parse_command("/press").is_err());
        assert!(parse_command("/press 0").is_err());
        assert!(parse_command("/press two").is_err());
        assert!(parse_command("/read").is_err());
        let err = parse_command("/dance").unwrap_err();
        assert!(err.to_string().contains("/dance"));
    }

    // ── format_message ──────────────────────────────────────────────────

    #[test]
    fn test_format_plain() {
        let msg = ChatMessage::new("m1", Role::Agent, "hello", "c1", 1_700_000_000_000);
        let line = format_message(&msg, false);
        assert!(line.starts_with('['));
        assert!(line.ends_with("] agent: hello"));
    }

    #[test]
    fn test_format_lists_buttons() {
        let mut msg = ChatMessage::new("m1", Role::Agent, "Resolved?", "c1", 0);
        msg.buttons = Some(vec![
            ActionButton {
                label: "Yes".into(),
                action: "resolve".into(),
                value: "yes".into(),
                resolution_id: "r1".into(),
            },
            ActionButton {
                label: "No".into(),
                action: "resolve".into(),
                value: "no".into(),
                resolution_id: "r1".into(),
            },
        ]);
        let out = format_message(&msg, false);
        assert!(out.contains("\n    [1] Yes"));
        assert!(out.contains("\n    [2] No"));
    }

    #[test]
    fn test_format_json() {
        let msg = ChatMessage::new("m1", Role::System, "note", "c1", 5);
        let value: serde_json::Value = serde_json::from_str(&format_message(&msg, true)).unwrap();
        assert_eq!(value["id"], "m1");
        assert_eq!(value["role"], "system");
        assert_eq!(value["created_at"], 5);
    }

    // ── Printer ─────────────────────────────────────────────────────────

    #[test]
    fn test_printer_shows_each_inbound_message_once() {
        let mut printer = Printer::default();
        let a = ChatMessage::new("a", Role::Agent, "one", "c", 0);
        let mine = ChatMessage::new("b", Role::User, "mine", "c", 1);
        let c = ChatMessage::new("c", Role::Agent, "two", "c", 2);

        assert_eq!(printer.take_new(&[a.clone()]), vec![a.clone()]);
        printer.expect_own("mine");
        assert_eq!(
            printer.take_new(&[a.clone(), mine.clone(), c.clone()]),
            vec![c.clone()]
        );
        printer.settle_own("mine", Some(&mine));
        assert!(printer.take_new(&[a.clone(), mine, c]).is_empty());

        // Torn down and reconnected: the same id may appear again.
        assert!(printer.take_new(&[]).is_empty());
        assert_eq!(printer.take_new(&[a.clone()]), vec![a]);
    }

    #[test]
    fn test_printer_shows_inbound_user_messages() {
        let mut printer = Printer::default();
        let replayed = ChatMessage::new("r", Role::User, "hi", "c", 0);
        assert_eq!(printer.take_new(&[replayed.clone()]), vec![replayed.clone()]);

        printer.expect_own("hi");
        let mine = ChatMessage::new("m", Role::User, "hi", "c", 1);
        assert!(printer.take_new(&[replayed.clone(), mine.clone()]).is_empty());
        printer.settle_own("hi", Some(&mine));

        // Nothing is expected any more, so a later "hi" from the server prints.
        let again = ChatMessage::new("x", Role::User, "hi", "c", 2);
        assert_eq!(
            printer.take_new(&[replayed, mine, again.clone()]),
            vec![again]
        );
    }

    #[test]
    fn test_printer_drops_expectation_for_unrecorded_send() {
        let mut printer = Printer::default();
        printer.expect_own("lost");
        printer.settle_own("lost", None);

        let unrecorded = ChatMessage::new("u", Role::User, "quiet", "c", 0);
        printer.expect_own("quiet");
        printer.settle_own("quiet", Some(&unrecorded));

        let inbound = ChatMessage::new("i", Role::User, "lost", "c", 1);
        assert_eq!(printer.take_new(&[inbound.clone()]), vec![inbound]);
    }

    // ── watch_transcript ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_auto_read_survives_policy_reconnect() {
        let connector = ScriptedConnector::auto_open();
        let config = SessionConfig::from_base_url("ws://localhost:8000")
            .unwrap()
            .with_reconnect(ReconnectPolicy::enabled());
        let mgr = SessionManager::new(config, connector.clone(), DurableState::in_memory());
        let printer = Arc::new(Mutex::new(Printer::default()));
        let _transcript = watch_transcript(&mgr, printer, false, true);

        mgr.connect(None).unwrap();
        mgr.flush().await.unwrap();
        let first = connector.last().unwrap();
        first.text("before");
        mgr.flush().await.unwrap();
        mgr.flush().await.unwrap();
        assert_eq!(mgr.unread_count(), 0);

        first.drop_connection(1006, "reset");
        mgr.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        mgr.flush().await.unwrap();
        assert_eq!(connector.count(), 2);
        assert!(mgr.is_connected());

        connector.last().unwrap().text("after");
        mgr.flush().await.unwrap();
        mgr.flush().await.unwrap();
        assert_eq!(mgr.message_count(), 1);
        assert_eq!(mgr.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_transcript_without_auto_read_leaves_unread() {
        let connector = ScriptedConnector::auto_open();
        let config = SessionConfig::from_base_url("ws://localhost:8000").unwrap();
        let mgr = SessionManager::new(config, connector.clone(), DurableState::in_memory());
        let _transcript = watch_transcript(&mgr, Arc::default(), false, false);

        mgr.connect(None).unwrap();
        mgr.flush().await.unwrap();
        connector.last().unwrap().text("hello");
        mgr.flush().await.unwrap();
        mgr.flush().await.unwrap();
        assert_eq!(mgr.unread_count(), 1);
    }
}
