use std::path::PathBuf;

use structopt::StructOpt;

use crate::config::DEFAULT_POCKY_ROOT;

#[derive(Debug, StructOpt)]
#[structopt(name = "pocky", about = "A minimal Linux container manager")]
pub struct Opt {
    /// Root directory for images and containers.
    #[structopt(long, default_value = DEFAULT_POCKY_ROOT, global = true)]
    pub pocky_root: PathBuf,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[structopt(short, long, parse(from_occurrences), global = true)]
    pub verbose: u8,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Run a container from an image.
    Run {
        /// Short id (prefix) of the image to run.
        image_id: String,

        /// Command and arguments to execute; overrides the image's config.Cmd.
        argv: Vec<String>,
    },

    /// Pull and flatten an image.
    Pull {
        name: String,
        tag: String,
    },

    /// List pulled images.
    Images,

    /// List running containers.
    Ps,

    /// Tear down a container.
    Rm {
        container_id: String,
    },

    /// Delete a pulled image.
    Rmi {
        image_id: String,
    },
}
