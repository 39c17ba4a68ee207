use std::process::ExitCode;
use std::sync::Arc;

use cue_tournaments::config::Config;
use cue_tournaments::db::Database;
use cue_tournaments::metrics::{gather_metrics, register_metrics};
use cue_tournaments::model::{LadderEntry, League};
use cue_tournaments::rating::RatingStrategy;
use cue_tournaments::{CoreResult, EventBus, LadderService};

const USAGE: &str = "usage: cue-tournaments [--database <URL>] [--rules <PATH>] <command>

commands:
  league <id> <name>     create a tiered league using the configured rule table
  ladder <league>        print a league ladder
  recalculate <league>   replay a league's rating log and print the ladder
  metrics                print metrics in Prometheus text format";

/// Positional arguments with the configuration flags removed.
fn command_args(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--database" || arg == "--rules" {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse().ok()
}

fn print_ladder(entries: &[LadderEntry]) {
    println!(
        "{:>4}  {:<24} {:>6} {:>4} {:>4} {:>6}",
        "pos", "player", "rating", "P", "W", "+/-"
    );
    for e in entries {
        let name = format!("{} {}", e.first_name, e.last_name);
        println!(
            "{:>4}  {:<24} {:>6} {:>4} {:>4} {:>6}",
            e.position, name, e.rating, e.matches_played, e.wins, e.frame_diff
        );
    }
}

async fn run(config: &Config, command: &[&str]) -> CoreResult<bool> {
    match command {
        ["metrics"] => {
            print!("{}", gather_metrics());
            return Ok(true);
        }
        ["league", _, _] | ["ladder", _] | ["recalculate", _] => {}
        _ => return Ok(false),
    }

    let db = Arc::new(Database::new(&config.database_url).await?);
    let ladder = LadderService::new(db, Default::default(), EventBus::new(config.event_capacity));

    match command {
        ["league", id, name] => {
            let Some(id) = parse_id(id) else {
                return Ok(false);
            };
            let league = ladder
                .create_league(League {
                    id,
                    name: name.to_string(),
                    base_rating: config.base_rating,
                    strategy: RatingStrategy::Tiered {
                        rules: config.rule_table()?,
                    },
                })
                .await?;
            println!("created league {} ({})", league.id, league.name);
        }
        ["ladder", id] => {
            let Some(id) = parse_id(id) else {
                return Ok(false);
            };
            print_ladder(&ladder.ladder(id).await?);
        }
        ["recalculate", id] => {
            let Some(id) = parse_id(id) else {
                return Ok(false);
            };
            print_ladder(&ladder.recalculate_ladder(id).await?);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    register_metrics();

    let config = Config::load();
    let args: Vec<String> = std::env::args().collect();
    let command = command_args(&args);

    match run(&config, &command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
