use anyhow::Context;
use siteline_cli::input::Input;
use siteline_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SITELINE_LOG", "error,siteline=info"))
        .init();

    let matches = siteline_cli::command().get_matches();

    let threads = matches
        .get_one::<u16>("threads")
        .map(|t| *t as usize)
        .unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("failed to configure worker threads")?;

    let job = Input::from_arguments(matches)?.build()?;
    Runner::new(job).run()
}
