use anyhow::Result;
use structopt::StructOpt;

use hpolfit::cli::{self, Hpolfit};

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub fn main() -> Result<()> {
    let opt = Hpolfit::from_args();

    fern::Dispatch::new()
        .format(|out, message, _| out.finish(format_args!("{}", message)))
        .level(if opt.verbose() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .chain(std::io::stderr())
        .apply()?;

    cli::run(opt)
}
