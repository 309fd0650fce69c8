use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("wayfinder")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("wayfinder")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and progress output").required(false))
        .arg(arg!(-v --"verbose" "Log decisions and steps at debug level").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init-config")
                .about("Writes a default exploration config to your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Where to write the config file")
                        .default_value("~/.config/wayfinder/config.json"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing config file without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("explore")
                .about(
                    "Autonomously explore a web UI from one or more start pages, within a \
                step, state, depth and time budget.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("A start URL (repeat for several)")
                        .value_parser(clap::value_parser!(Url))
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of start URLs")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("Config file (default: ~/.config/wayfinder/config.json if present)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-p --"parallel" <BROWSERS>)
                        .required(false)
                        .help("Number of concurrent browser sessions")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-steps" <STEPS>)
                        .required(false)
                        .help("Total action budget for the run")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-states" <STATES>)
                        .required(false)
                        .help("Stop after this many distinct UI states")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Deepest action chain to follow from a start page")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"strict")
                        .required(false)
                        .help("Treat every action failure as blocking")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-m --"mode" <MODE>)
                        .required(false)
                        .help("Work unit per start page, or per action on the first start page")
                        .value_parser(["pages", "branches"]),
                )
                .arg(
                    arg!(--"llm-endpoint" <URL>)
                        .required(false)
                        .help(
                            "OpenAI-compatible chat completions endpoint for uncertain decisions \
                        (API key is read from WAYFINDER_LLM_API_KEY)",
                        ),
                )
                .arg(
                    arg!(--"llm-model" <MODEL>)
                        .required(false)
                        .help("Model name sent to the LLM endpoint (default: gpt-4o-mini)")
                        .requires("llm-endpoint"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Summary format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save the summary to a file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
