//! `chalkline` command-line entry point (native).

#[cfg(feature = "native")]
mod cli {
    use chalkline_app::{AppConfig, Whiteboard, WhiteboardError};
    use chalkline_core::geometry::bounds;
    use chalkline_core::identity::Identity;
    use chalkline_core::storage::{BoardSnapshot, FileStorage, SnapshotStore, StorageError};
    use chalkline_core::sync::WsTransport;
    use chalkline_core::transport::TransportError;
    use chalkline_render::{GridStyle, PixmapSurface, Renderer, RendererError, flatten, paint_background};
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    #[derive(Debug, thiserror::Error)]
    pub enum CliError {
        #[error("io error on {path}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error(transparent)]
        Storage(#[from] StorageError),
        #[error(transparent)]
        Render(#[from] RendererError),
        #[error(transparent)]
        Transport(#[from] TransportError),
        #[error(transparent)]
        Whiteboard(#[from] WhiteboardError),
        #[error("could not join the board at {0}")]
        Offline(String),
    }

    #[derive(Parser, Debug)]
    #[command(name = "chalkline", about = "Chalkline whiteboard tools")]
    pub struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// Render a saved board snapshot to a PNG file.
        Render {
            /// Snapshot JSON file.
            input: PathBuf,
            /// Output PNG file.
            output: PathBuf,
            #[arg(long, default_value_t = 1280)]
            width: u32,
            #[arg(long, default_value_t = 800)]
            height: u32,
            /// Plain white background.
            #[arg(long, default_value_t = false)]
            no_grid: bool,
        },
        /// List snapshots in a storage directory.
        List {
            /// Defaults to the platform data directory.
            #[arg(long)]
            dir: Option<PathBuf>,
        },
        /// Join a relay room, follow the board, then write it as PNG.
        Join {
            #[arg(long, env = "CHALKLINE_URL", default_value = "ws://127.0.0.1:3030/ws")]
            url: String,
            #[arg(long, default_value = chalkline_app::DEFAULT_CHANNEL)]
            channel: String,
            #[arg(long, default_value = "observer")]
            user: String,
            /// How long to follow the board.
            #[arg(long, default_value_t = 10)]
            seconds: u64,
            #[arg(long, default_value = "board.png")]
            output: PathBuf,
        },
    }

    pub fn run(cli: Cli) -> Result<(), CliError> {
        match cli.command {
            Command::Render {
                input,
                output,
                width,
                height,
                no_grid,
            } => {
                let grid = if no_grid { GridStyle::None } else { GridStyle::Lines };
                render_snapshot(&input, &output, width, height, grid)
            }
            Command::List { dir } => list_snapshots(dir),
            Command::Join {
                url,
                channel,
                user,
                seconds,
                output,
            } => follow_board(&url, channel, user, Duration::from_secs(seconds), &output),
        }
    }

    fn read(path: &PathBuf) -> Result<String, CliError> {
        std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })
    }

    fn write(path: &PathBuf, data: &[u8]) -> Result<(), CliError> {
        std::fs::write(path, data).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })
    }

    fn render_snapshot(
        input: &PathBuf,
        output: &PathBuf,
        width: u32,
        height: u32,
        grid: GridStyle,
    ) -> Result<(), CliError> {
        let snapshot = BoardSnapshot::from_json(&read(input)?)?;
        let log = snapshot.to_log();

        let extent = log
            .iter()
            .filter_map(|stroke| bounds(&stroke.points))
            .reduce(|a, b| a.union(b));
        if let Some(extent) = extent {
            if extent.x1 > f64::from(width) || extent.y1 > f64::from(height) || extent.x0 < 0.0 || extent.y0 < 0.0 {
                log::warn!(
                    "Strokes span ({:.0}, {:.0})-({:.0}, {:.0}) and are cut off at {}x{}",
                    extent.x0,
                    extent.y0,
                    extent.x1,
                    extent.y1,
                    width,
                    height
                );
            }
        }

        let mut background = PixmapSurface::new(width, height)?;
        paint_background(&mut background, grid);
        let mut drawing = PixmapSurface::new(width, height)?;
        drawing.render_all(&log);

        write(output, &flatten(&background, &drawing).encode_png()?)?;
        log::info!(
            "Rendered {} strokes of {:?} to {}",
            log.len(),
            snapshot.name,
            output.display()
        );
        Ok(())
    }

    fn list_snapshots(dir: Option<PathBuf>) -> Result<(), CliError> {
        let storage = match dir {
            Some(dir) => FileStorage::new(dir)?,
            None => FileStorage::default_location()?,
        };
        for id in snapshot_ids(&storage)? {
            println!("{}", id);
        }
        Ok(())
    }

    fn snapshot_ids(store: &dyn SnapshotStore) -> Result<Vec<String>, CliError> {
        Ok(pollster::block_on(store.list())?)
    }

    fn follow_board(
        url: &str,
        channel: String,
        user: String,
        duration: Duration,
        output: &PathBuf,
    ) -> Result<(), CliError> {
        let config = AppConfig {
            channel,
            ..AppConfig::default()
        };
        let transport = WsTransport::connect(url)?;
        let mut board = Whiteboard::new(config, transport)?;
        board.sign_in(Identity::new(user.clone()).with_display_name(user));
        if !board.is_live() {
            return Err(CliError::Offline(url.to_string()));
        }

        let started = Instant::now();
        let mut last_count = 0;
        while started.elapsed() < duration {
            board.pump();
            for notice in board.take_notices() {
                log::warn!("{}", notice.message);
            }
            if board.log().len() != last_count {
                last_count = board.log().len();
                log::info!("{} strokes, {} online", last_count, board.online_count());
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        board.sign_out();
        write(output, &board.export_png()?)?;
        println!("{} strokes written to {}", board.log().len(), output.display());
        Ok(())
    }

}

#[cfg(feature = "native")]
fn main() -> std::process::ExitCode {
    use clap::Parser;

    env_logger::init();
    match cli::run(cli::Cli::parse()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "native"))]
fn main() {
    panic!("Native feature not enabled. Use `cargo run --features native`");
}
