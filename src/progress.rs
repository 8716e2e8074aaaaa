//! Progress reporting for long-running streaming steps (GRIN's table
//! load, Wikispecies's dump scan), mirroring the project's usual
//! `indicatif` spinner/bar helpers rather than ad hoc `eprintln!`s.

use indicatif::{ProgressBar, ProgressStyle};

static SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:2.cyan/blue} {msg}: {human_pos}";
static BAR_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}";

/// A spinner for steps where the total item count isn't known ahead
/// of time (streaming a dump, a table of unknown row count).
pub fn spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE).expect("static template is valid");
    ProgressBar::new_spinner().with_message(message.to_string()).with_style(style)
}

/// A bounded bar for steps with a known total, e.g. a batched insert
/// pass over a Vec already collected in memory.
pub fn bar(total: usize, message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(BAR_TEMPLATE).expect("static template is valid");
    ProgressBar::new(total as u64).with_message(message.to_string()).with_style(style)
}
