//! shmkv admin CLI
//!
//! Inspect and modify a file-backed region from the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use shmkv::{Config, HashFn, HashRange, OpenMode, QueueOrder, ScanRequest, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// shmkv admin CLI
#[derive(Parser, Debug)]
#[command(name = "shmkv")]
#[command(about = "Admin tool for shmkv shared-memory regions")]
#[command(version)]
struct Args {
    /// Region file
    #[arg(short, long, default_value = "./shmkv.region")]
    path: PathBuf,

    /// Hash implementation (must match the one the region was created with)
    #[arg(long, value_enum, default_value = "crc32")]
    hash: HashChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashChoice {
    Crc32,
    Fnv1a,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new region, replacing any existing file
    Init {
        #[arg(long, default_value = "8")]
        bit_depth: u32,

        #[arg(long, default_value = "20")]
        max_bit_depth: u32,

        #[arg(long, default_value = "2")]
        collision_bits: u32,

        #[arg(long, default_value = "256")]
        page_size: u32,

        #[arg(long, default_value = "4096")]
        elements: u32,

        #[arg(long, default_value = "16384")]
        pages: u32,
    },

    /// Print region counters
    Stats,

    /// Check the index against the stored elements
    Verify,

    /// Print the value of a key
    Get { key: String },

    /// Set the value of a key
    Set { key: String, value: String },

    /// Delete a key
    Del { key: String },

    /// Grow the bucket index to a new bit depth
    GrowIndex { depth: u32 },

    /// Split the bucket entry routing a primary hash
    Split { hash: u32 },

    /// Add element nodes
    GrowElements { count: u32 },

    /// Add pages
    GrowPages { count: u32 },

    /// Push a value onto a queue
    Push {
        queue: String,
        value: String,
        #[arg(long)]
        lifo: bool,
    },

    /// Pop the head of a queue
    Pop { queue: String },

    /// Count the elements whose hash falls in a range
    Scan {
        #[arg(long, default_value = "0")]
        start: u64,
        #[arg(long, default_value = "4294967296")]
        span: u64,
        #[arg(long, default_value = "4294967296")]
        modulus: u64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shmkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> shmkv::Result<()> {
    let hash_fn = match args.hash {
        HashChoice::Crc32 => HashFn::Crc32,
        HashChoice::Fnv1a => HashFn::Fnv1a,
    };

    let config = match &args.command {
        Commands::Init {
            bit_depth,
            max_bit_depth,
            collision_bits,
            page_size,
            elements,
            pages,
        } => Config::builder()
            .path(&args.path)
            .open_mode(OpenMode::Create)
            .hash_fn(hash_fn)
            .bit_depth(*bit_depth)
            .max_bit_depth(*max_bit_depth)
            .collision_bits(*collision_bits)
            .page_size(*page_size)
            .element_capacity(*elements)
            .page_capacity(*pages)
            .build(),
        _ => Config::builder()
            .path(&args.path)
            .open_mode(OpenMode::Open)
            .hash_fn(hash_fn)
            .build(),
    };

    let store = Store::open(config)?;

    match args.command {
        Commands::Init { .. } => {
            println!("created {}", args.path.display());
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("{:#?}", stats);
        }
        Commands::Verify => {
            store.verify()?;
            println!("ok");
        }
        Commands::Get { key } => match store.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value } => {
            store.set(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            let existed = store.remove(key.as_bytes())?;
            println!("{}", if existed { 1 } else { 0 });
        }
        Commands::GrowIndex { depth } => {
            let added = store.grow_index(depth)?;
            println!("added {} bucket entries", added);
        }
        Commands::Split { hash } => {
            let split = store.split_bucket(hash)?;
            println!("{}", if split { "split" } else { "already at current depth" });
        }
        Commands::GrowElements { count } => {
            store.grow_elements(count)?;
            println!("OK");
        }
        Commands::GrowPages { count } => {
            store.grow_pages(count)?;
            println!("OK");
        }
        Commands::Push { queue, value, lifo } => {
            let order = if lifo { QueueOrder::Lifo } else { QueueOrder::Fifo };
            store.queue(queue.as_bytes()).push(value.as_bytes(), order)?;
            println!("OK");
        }
        Commands::Pop { queue } => match store.queue(queue.as_bytes()).pop()? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(empty)"),
        },
        Commands::Scan {
            start,
            span,
            modulus,
        } => {
            let mut request = ScanRequest::new(HashRange::new(start, span, modulus)).max_elements(1024);
            let mut total = 0usize;
            loop {
                let chunk = store.scan_by_hash(&request)?;
                total += chunk.elements.len();
                match chunk.next_hash {
                    Some(next) => request = request.start_hash(next),
                    None => break,
                }
            }
            println!("{} elements", total);
        }
    }

    store.flush()
}
