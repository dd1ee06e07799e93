//! Interactive REPL.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;

const HELP_TEXT: &str = r#"
Commands take the form: <phone> <verb> [args...]

  <phone> get {startup|gps|cdradio|ntripcors|ntripservice|jt808service}
  <phone> set startup [gps] [cdradio] [ntripcors] [ntripservice] [jt808service]
  <phone> set gps [LOGGGA] [LOGRMC] [LOGATT]
  <phone> set cdradio <bauderate> <workfreqpoint> <recvmode> <formcode>
  <phone> set ntripcors <ip> <port> <user> <password> <mountpoint> <interval>
  <phone> set ntripservice <ip> <port> <user> <password> <mountpoint> <interval>
  <phone> set jt808service <ip> <port> <phonenum> <interval>

  <phone> getterminalparameter [hex-ids...]
  <phone> setterminalparameter <hexid:value> [...]

  <phone> setcirculararea <update|append|modify> <id> <attr> <lat> <lon> <radius> ...
  <phone> setrectanglearea <update|append|modify> <id> <attr> <lat1> <lon1> <lat2> <lon2> ...
  <phone> setpolygonalarea <update|append|modify> <id> <attr> <count> <lat> <lon> ...
  <phone> delcirculararea|delrectanglearea|delpolygonalarea [hex-ids...]

  <phone> upgrade <device|gps|cdradio|system> <version> <firmware-path>

  help                  Show this help
  quit, exit            Exit the REPL
"#;

pub async fn run(socket: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "jt808d operator console".bold().cyan());
    println!("Control socket: {}", socket.display());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".jt808_history"))
        .unwrap_or_else(|_| ".jt808_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for the command grammar.\n");

    loop {
        let prompt = format!("{} ", "jt808>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "help" => {
                        println!("{HELP_TEXT}");
                        continue;
                    }
                    "quit" | "exit" => break,
                    _ => {}
                }
                // the gateway serves one command per connection
                match crate::send_command(socket, line).await {
                    Ok(reply) => println!("{reply}\n"),
                    Err(e) => println!("{}: {}\n", "error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("{}: {}", "error".red(), e);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    println!("bye");
    Ok(())
}
