mod logger;

use std::fs;

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use config::{Metadata, Options, Platform, Version};
use subscription::Subscription;
use template::Synthesizer;

use crate::logger::setup_logger;

fn cli() -> Command {
    Command::new("boxgen")
        .version(env!("CARGO_PKG_VERSION"))
        .author("gfreezy <gfreezy@gmail.com>")
        .about("Generates sing-box configurations from templates and subscriptions.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets config file, JSON or YAML.")
                .required(true),
        )
        .arg(
            Arg::new("profile")
                .short('p')
                .long("profile")
                .value_name("NAME")
                .help("Profile to render. Defaults to the first profile."),
        )
        .arg(
            Arg::new("platform")
                .long("platform")
                .value_name("PLATFORM")
                .value_parser(["android", "ios", "macos", "tvos"])
                .help("Platform of the client."),
        )
        .arg(
            Arg::new("engine_version")
                .long("engine-version")
                .value_name("SEMVER")
                .help("sing-box version of the client. Latest when omitted."),
        )
        .arg(
            Arg::new("user_agent")
                .long("user-agent")
                .value_name("UA")
                .help("User agent of the client, e.g. `SFA/1.10.1 (458; sing-box 1.10.1)`."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file. Writes to stdout when omitted."),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .value_name("PATH")
                .help("Log file."),
        )
}

/// Metadata detected from the user agent, overridden by explicit flags.
fn client_metadata(matches: &ArgMatches) -> Result<Metadata> {
    let mut metadata = matches
        .get_one::<String>("user_agent")
        .map(|ua| Metadata::detect(ua))
        .unwrap_or_default();
    if let Some(platform) = matches.get_one::<String>("platform") {
        metadata.platform = platform.parse::<Platform>()?;
    }
    if let Some(version) = matches.get_one::<String>("engine_version") {
        let version =
            Version::parse(version).with_context(|| format!("invalid engine version {version}"))?;
        metadata.version = Some(version);
    }
    Ok(metadata)
}

fn fetch_subscriptions(options: &Options, names: &[String]) -> Vec<Subscription> {
    names
        .iter()
        .filter_map(|name| options.subscription(name))
        .filter_map(|options| match Subscription::fetch(options) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!(subscription = %options.name, "fetch subscription failed: {e:#}");
                None
            }
        })
        .collect()
}

fn run(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<String>("config")
        .context("missing config file")?;
    let options = Options::from_config_file(path)?;
    setup_logger(
        matches.get_one::<String>("log").map(String::as_str),
        options.log.as_ref(),
    )?;

    let metadata = client_metadata(matches)?;
    let user_agent = matches.get_one::<String>("user_agent").map(String::as_str);
    let synthesizer = Synthesizer::new(options)?;
    let profile = match matches.get_one::<String>("profile") {
        Some(name) => synthesizer
            .profile(name)
            .with_context(|| format!("unknown profile: {name}"))?,
        None => match synthesizer.options().profiles.first() {
            Some(profile) => profile,
            None => bail!("no profile configured"),
        },
    };
    tracing::info!(
        profile = %profile.name,
        platform = %metadata.platform,
        version = ?metadata.version,
        "render"
    );

    let subscriptions = fetch_subscriptions(synthesizer.options(), &profile.subscription);
    let rendered =
        synthesizer.render_profile(&profile.name, &metadata, user_agent, &subscriptions)?;
    let json = rendered.to_pretty_json().context("encode configuration")?;
    match matches.get_one::<String>("output") {
        Some(output) => {
            fs::write(output, json + "\n").with_context(|| format!("write {output}"))?;
            tracing::info!(%output, "configuration written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    run(&matches)
}
