use clap::Parser;

use httpd::cli::Args;
use httpd::supervisor;

fn main() {
    let args = Args::parse();
    supervisor::run(args);
}
