use clap::{Parser, Subcommand};

use crate::reconcile::Scope;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Embed every post that has no cached embedding yet
    Embed,

    /// Recompute related posts from the embedding cache and
    /// write them back as internal tags
    Relate,

    /// Embed, then relate
    Sync,

    /// Generate descriptive tags for posts
    Tag {
        /// Regenerate for every post and drop its existing public tags
        #[clap(long, default_value = "false")]
        reset: bool,
    },

    /// Strip tags from every post
    Cleanup {
        /// Which tags to strip
        #[clap(value_enum)]
        scope: Scope,

        /// Also delete the matching local snapshots
        #[clap(long, default_value = "false")]
        purge_cache: bool,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Show local cache counts
    Status,
}
