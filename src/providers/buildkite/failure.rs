use regex::bytes::Regex;
use std::sync::LazyLock;

static POST_COMMAND_HOOK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"~~~ Running (global|local|plugin) post-command hook").expect("valid regex")
});

static RUN_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"~~~ Running (global command|local command|plugin command|command|commands|script|batch script)\b",
    )
    .expect("valid regex")
});

/// Finds the most relevant part of a job log: the output of the command
/// that ran right before the post-command hook.
///
/// Without a post-command hook the first `max_lines` lines are returned.
/// With one, walks back at most `max_lines` lines from the hook and stops
/// early at a "Running command/script" header.
pub fn find_build_failure(log: &[u8], max_lines: usize) -> &[u8] {
    if log.is_empty() {
        return log;
    }

    let Some(hook) = POST_COMMAND_HOOK.find(log) else {
        return first_lines(log, max_lines);
    };
    let hook_start = hook.start();

    let mut line_start = hook_start;
    for _ in 0..max_lines {
        let Some(newline) = log[..line_start].iter().rposition(|&b| b == b'\n') else {
            return &log[..hook_start];
        };
        if RUN_COMMAND.is_match(&log[newline + 1..line_start]) {
            break;
        }
        line_start = newline;
    }

    &log[line_start..hook_start]
}

/// The first `count` lines of `log`, without the final newline.
fn first_lines(log: &[u8], count: usize) -> &[u8] {
    if count == 0 {
        return &log[..0];
    }
    log.iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .nth(count - 1)
        .map_or(log, |(idx, _)| &log[..idx])
}
