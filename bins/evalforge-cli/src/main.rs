mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evalforge-cli")]
#[command(about = "EvalForge CLI - Inspect submissions, challenge packs and scores offline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the project type of a checked-out submission
    Detect {
        /// Repository root
        path: PathBuf,
    },

    /// Print the Dockerfile the build engine would use for a submission
    RenderDockerfile {
        /// Repository root
        path: PathBuf,

        /// Image name used for the submission's own Dockerfile build
        #[arg(long, default_value = "evalforge-submission:local-base")]
        submission_image: String,
    },

    /// Write the default challenge pack into a directory
    InitPack {
        /// Target directory (created if missing)
        dir: PathBuf,

        /// Seconds the default test step may run
        #[arg(long, default_value = "300")]
        time_box_secs: u64,

        /// Line count above which a source file counts as oversized
        #[arg(long, default_value = "500")]
        oversized_lines: u64,

        /// Overwrite an existing entrypoint.sh
        #[arg(short, long)]
        force: bool,
    },

    /// Score a test artifact the way the worker would
    Score {
        /// Path to a score.json artifact
        #[arg(short, long)]
        artifact: PathBuf,

        /// Treat the image build as failed
        #[arg(long)]
        build_failed: bool,

        #[arg(long, default_value = "")]
        repo_url: String,

        #[arg(long, default_value = "")]
        pitch_deck_url: String,

        #[arg(long, default_value = "")]
        demo_video_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect { path } => {
            commands::detect(&path).await?;
        }
        Commands::RenderDockerfile {
            path,
            submission_image,
        } => {
            commands::render_dockerfile(&path, &submission_image).await?;
        }
        Commands::InitPack {
            dir,
            time_box_secs,
            oversized_lines,
            force,
        } => {
            commands::init_pack(&dir, time_box_secs, oversized_lines, force).await?;
        }
        Commands::Score {
            artifact,
            build_failed,
            repo_url,
            pitch_deck_url,
            demo_video_url,
        } => {
            commands::score(
                &artifact,
                !build_failed,
                &repo_url,
                &pitch_deck_url,
                &demo_video_url,
            )
            .await?;
        }
    }

    Ok(())
}
