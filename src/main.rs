use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use musicd::ipc::{ClientCommand, DaemonClient, Payload, SelectAction};
use musicd::{lifecycle, Candidate, DaemonConfig, DaemonError, PlaybackState, StatusSnapshot, Track};

const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Queue and play music from search queries in the background.
#[derive(Parser, Debug)]
#[command(name = "musicd", version, about)]
struct Cli {
  /// Config file (defaults to $XDG_CONFIG_HOME/musicd/config.json).
  #[arg(long, global = true, env = "MUSICD_CONFIG")]
  config: Option<PathBuf>,

  /// Directory for the socket, lock and log files.
  #[arg(long, global = true, env = "MUSICD_RUNTIME_DIR")]
  runtime_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Verb,
}

#[derive(Subcommand, Debug)]
enum Verb {
  /// Run the daemon in the foreground
  Daemon,
  /// Play the best match now, replacing the current track
  Play {
    #[arg(required = true)]
    query: Vec<String>,
  },
  /// List matches and pick one to play or queue
  Search {
    #[arg(required = true)]
    query: Vec<String>,
  },
  /// Append the best match to the queue
  QueueAdd {
    #[arg(required = true)]
    query: Vec<String>,
  },
  /// Show the queue
  QueueList,
  /// Remove a queued track by its number in `queue-list`
  QueueRemove { number: usize },
  /// Skip to the next queued track
  Next,
  Pause,
  Resume,
  /// Show the current track and the queue
  Status,
  /// Follow playback live; asks for a new track when the queue runs out
  Monitor,
  /// Stop playback, keeping the queue
  Stop,
  /// Stop the daemon
  Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();
  let is_daemon = matches!(cli.command, Verb::Daemon);
  musicd::init_logging(if is_daemon { "musicd=info" } else { "musicd=warn" });

  let result = match load_config(&cli) {
    Ok(config) if is_daemon => lifecycle::run_daemon(config).await,
    Ok(config) => run_client(&cli, &config).await,
    Err(e) => Err(e),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("musicd: {} ({:?})", e, e.kind());
      ExitCode::FAILURE
    }
  }
}

fn load_config(cli: &Cli) -> Result<DaemonConfig, DaemonError> {
  let mut config = DaemonConfig::load(cli.config.as_deref())?;
  if let Some(dir) = &cli.runtime_dir {
    config.runtime_dir = Some(dir.to_string_lossy().into_owned());
  }
  Ok(config)
}

async fn run_client(cli: &Cli, config: &DaemonConfig) -> Result<(), DaemonError> {
  let command = match &cli.command {
    Verb::Daemon => return Ok(()),
    Verb::Monitor => {
      lifecycle::ensure_daemon(config, cli.config.as_deref()).await?;
      let mut client = DaemonClient::connect(&config.socket_path()).await?;
      return monitor(&mut client).await;
    }
    Verb::Play { query } => ClientCommand::Play {
      query: query.join(" "),
    },
    Verb::Search { query } => ClientCommand::Search {
      query: query.join(" "),
    },
    Verb::QueueAdd { query } => ClientCommand::QueueAdd {
      query: query.join(" "),
    },
    Verb::QueueList => ClientCommand::QueueList,
    Verb::QueueRemove { number } => ClientCommand::QueueRemove {
      index: from_display_number(*number)?,
    },
    Verb::Next => ClientCommand::Next,
    Verb::Pause => ClientCommand::Pause,
    Verb::Resume => ClientCommand::Resume,
    Verb::Status => ClientCommand::Status,
    Verb::Stop => ClientCommand::Stop,
    Verb::Shutdown => ClientCommand::Shutdown,
  };

  // Starting a daemon only to shut it down again is pointless.
  if command == ClientCommand::Shutdown && !lifecycle::probe(&config.socket_path()).await {
    println!("musicd is not running");
    return Ok(());
  }
  if command != ClientCommand::Shutdown {
    lifecycle::ensure_daemon(config, cli.config.as_deref()).await?;
  }

  let mut client = DaemonClient::connect(&config.socket_path()).await?;
  let payload = client.send(&command).await?;

  match payload {
    Payload::Candidates { tracks } => {
      print_candidates(&tracks);
      if !tracks.is_empty() && std::io::stdin().is_terminal() {
        if let Some(select) = prompt_selection(tracks.len()).await? {
          let payload = client.send(&select).await?;
          print_payload(payload);
        }
      }
    }
    Payload::Status(status) if command == ClientCommand::Status => {
      let queue = fetch_queue(&mut client).await?;
      print!("{}", render_view(&status, &queue));
      if let Some(previous) = status.history.last() {
        println!("previous: {}", previous);
      }
    }
    other => print_payload(other),
  }
  Ok(())
}

async fn fetch_queue(client: &mut DaemonClient) -> Result<Vec<Track>, DaemonError> {
  match client.send(&ClientCommand::QueueList).await? {
    Payload::Queue { tracks } => Ok(tracks),
    other => Err(DaemonError::Protocol(format!(
      "expected a queue, got {:?}",
      other
    ))),
  }
}

/// Poll status on one connection and reprint whenever it changes.
async fn monitor(client: &mut DaemonClient) -> Result<(), DaemonError> {
  let interactive = std::io::stdin().is_terminal();
  let mut last_view = String::new();

  loop {
    let status = match client.send(&ClientCommand::Status).await? {
      Payload::Status(status) => status,
      other => {
        return Err(DaemonError::Protocol(format!(
          "expected a status, got {:?}",
          other
        )))
      }
    };
    let queue = fetch_queue(client).await?;

    let view = render_view(&status, &queue);
    if view != last_view {
      println!("{}", view);
      last_view = view;
    }

    if interactive && status.current.is_none() && queue.is_empty() {
      let Some(query) = read_line("Queue finished. Next track (Enter to quit): ").await? else {
        return Ok(());
      };
      match client.send(&ClientCommand::Play { query }).await {
        Ok(payload) => print_payload(payload),
        Err(e) => eprintln!("musicd: {}", e),
      }
      continue;
    }

    tokio::select! {
      _ = tokio::signal::ctrl_c() => return Ok(()),
      _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
    }
  }
}

/// One trimmed line from stdin; `None` on Enter, EOF or Ctrl+C.
async fn read_line(prompt: &str) -> Result<Option<String>, DaemonError> {
  print!("{}", prompt);
  std::io::stdout().flush()?;
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let line = tokio::select! {
    _ = tokio::signal::ctrl_c() => None,
    line = lines.next_line() => line?,
  };
  Ok(line
    .map(|l| l.trim().to_string())
    .filter(|l| !l.is_empty()))
}

/// Current track, state and queue as printed by `status` and `monitor`.
fn render_view(status: &StatusSnapshot, queue: &[Track]) -> String {
  let mut out = match (&status.current, status.state) {
    (Some(track), PlaybackState::Paused) => format!("Paused: {}", track),
    (Some(track), _) => format!("Now playing: {}", track),
    (None, _) => "Nothing playing".to_string(),
  };
  if let Some(track) = &status.current {
    out.push_str(&duration_suffix(track.duration));
  }
  out.push('\n');

  if let Some(error) = &status.last_error {
    out.push_str(&format!("last error ({:?}): {}\n", error.kind, error.message));
  }
  out.push_str(&format!("Queue ({}):\n", queue.len()));
  for (i, track) in queue.iter().enumerate() {
    out.push_str(&format!("{:>3}. {}{}\n", i + 1, track, duration_suffix(track.duration)));
  }
  out
}

fn from_display_number(number: usize) -> Result<usize, DaemonError> {
  number
    .checked_sub(1)
    .ok_or_else(|| DaemonError::NotFound("track numbers start at 1".to_string()))
}

/// Ask which candidate to use. `N` plays it, `+N` queues it, empty cancels.
async fn prompt_selection(count: usize) -> Result<Option<ClientCommand>, DaemonError> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    print!("Play 1-{} (or +N to queue, Enter to cancel): ", count);
    std::io::stdout().flush()?;

    let Some(line) = lines.next_line().await? else {
      return Ok(None);
    };
    let input = line.trim();
    if input.is_empty() {
      return Ok(None);
    }

    let (action, digits) = match input.strip_prefix('+') {
      Some(rest) => (SelectAction::QueueAdd, rest.trim()),
      None => (SelectAction::Play, input),
    };
    match digits.parse::<usize>() {
      Ok(n) if (1..=count).contains(&n) => {
        return Ok(Some(ClientCommand::Select {
          index: n - 1,
          action,
        }))
      }
      _ => println!("Enter a number between 1 and {}", count),
    }
  }
}

fn print_payload(payload: Payload) {
  match payload {
    Payload::Ack => println!("ok"),
    Payload::Status(status) => print_status(&status),
    Payload::Candidates { tracks } => print_candidates(&tracks),
    Payload::Queue { tracks } => {
      if tracks.is_empty() {
        println!("Queue is empty");
      }
      for (i, track) in tracks.iter().enumerate() {
        println!("{:>3}. {}{}", i + 1, track, duration_suffix(track.duration));
      }
    }
    Payload::Enqueued {
      track,
      queue_length,
    } => println!("Queued #{}: {}", queue_length, track),
    Payload::Removed { track } => println!("Removed: {}", track),
  }
}

fn print_status(status: &StatusSnapshot) {
  match &status.current {
    Some(track) => println!("{}: {}{}", status.state, track, duration_suffix(track.duration)),
    None => println!("{}", status.state),
  }
  println!("queued: {}", status.queue_length);
  if let Some(error) = &status.last_error {
    println!("last error ({:?}): {}", error.kind, error.message);
  }
  if let Some(previous) = status.history.last() {
    println!("previous: {}", previous);
  }
}

fn print_candidates(tracks: &[Candidate]) {
  if tracks.is_empty() {
    println!("No results");
  }
  for (i, c) in tracks.iter().enumerate() {
    println!("{:>3}. {}{}", i + 1, c, duration_suffix(c.duration));
  }
}

fn duration_suffix(duration: Option<f64>) -> String {
  match duration {
    Some(secs) if secs.is_finite() && secs >= 0.0 => {
      let secs = secs.round() as u64;
      format!(" [{}:{:02}]", secs / 60, secs % 60)
    }
    _ => String::new(),
  }
}
