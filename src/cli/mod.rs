//! CLI module - Command-line interface for crawlgate
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// crawlgate - Search gateway and crawl scheduler
/// Cached index search with SLA-bound re-crawl jobs
#[derive(Parser)]
#[command(name = "crawlgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server, crawl workers and maintenance
    #[command(alias = "daemon", alias = "-d")]
    Serve,

    /// Run one search through the cache-aside path
    #[command(alias = "s")]
    Search {
        /// Query text
        #[arg(required = true)]
        query: Vec<String>,
        /// 1-based page number
        #[arg(long, default_value = "1")]
        page: u32,
        /// Results per page
        #[arg(long, default_value = "10")]
        page_size: u32,
    },

    /// Persist a re-crawl (or crawl) job
    Submit {
        /// Page URL
        url: String,
        /// Priority from 0 to 10
        #[arg(long)]
        priority: Option<i32>,
        /// Submit as a regular crawl instead of a re-crawl
        #[arg(long)]
        crawl: bool,
    },

    /// Show a job snapshot
    Status {
        /// Job ID (UUID)
        job_id: String,
    },

    /// Run one maintenance pass against the database
    Sweep {
        /// Reload active jobs first, expiring in-progress leases.
        /// Only safe while no server is running.
        #[arg(long)]
        recover: bool,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

pub use commands::*;
