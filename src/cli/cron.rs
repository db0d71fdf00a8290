use anyhow::Result;
use chrono::Utc;

use crate::core::scheduler::{TriggerArgs, parse_cron_pattern};
use crate::core::terminal::{GuideSection, print_error, print_status};

const PREVIEW_RUNS: usize = 5;

pub fn explain(pattern: &str) -> Result<()> {
    let args = match parse_cron_pattern(pattern) {
        Ok(args) => args,
        Err(e) => {
            print_error(&e.to_string());
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&args)?);
    print_status("Engine expression", &args.engine_expression());

    let trigger = TriggerArgs::Cron(args);
    let mut section = GuideSection::new("Next runs (UTC)");
    let mut after = Utc::now();
    for n in 1..=PREVIEW_RUNS {
        let Some(next) = trigger.next_fire_after(after) else {
            break;
        };
        section = section.command(&format!("#{}", n), &next.to_rfc3339());
        after = next;
    }
    println!();
    section.print();
    Ok(())
}
