use regex::{Captures, Regex};
use std::borrow::Cow;
use std::fmt::Write;
use std::sync::LazyLock;
use std::time::Duration;

use comfy_table::{Cell, Color as TableColor};
use termimad::MadSkin;

use super::styling::{bright, bright_green, bright_red, cyan, dim};
use super::tables::{create_table, job_duration_cell};
use crate::providers::buildkite::{Annotation, Build};

/// Annotations wrap at the terminal width, but never wider than this.
const MAX_ANNOTATION_WIDTH: usize = 120;

static PRE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)[^>]*>").expect("valid regex"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]*);").expect("valid regex")
});

/// Everything known about a finished build when its summary is printed.
pub struct BuildReport<'a> {
    pub build: &'a Build,
    /// Wall-clock duration, rounded to the second.
    pub elapsed: Duration,
    pub annotations: &'a [Annotation],
    /// Tail of the first failed job's log, if it could be fetched.
    pub failure_excerpt: Option<&'a [u8]>,
    pub failure_lines: usize,
}

fn add_section_header(output: &mut String, title: &str) {
    let _ = writeln!(output, "\n{}", bright(title).underlined());
}

/// Renders the end-of-build report: job timings, failure output,
/// annotations and the outcome line.
pub fn render_summary(report: &BuildReport<'_>) -> String {
    let build = report.build;
    let mut output = String::new();

    let named_jobs: Vec<_> = build
        .jobs
        .iter()
        .filter(|job| job.name.as_deref().is_some_and(|name| !name.is_empty()))
        .collect();
    if !named_jobs.is_empty() {
        let mut table = create_table();
        table.set_header(vec![
            Cell::new("Job").fg(TableColor::Cyan),
            Cell::new("Duration").fg(TableColor::Cyan),
        ]);
        for job in named_jobs {
            table.add_row(vec![
                Cell::new(job.name.as_deref().unwrap_or_default()),
                job_duration_cell(job),
            ]);
        }
        let _ = writeln!(output, "{table}");
    }

    if let Some(excerpt) = report.failure_excerpt.filter(|e| !e.is_empty()) {
        add_section_header(
            &mut output,
            &format!("Last {} lines of failed build output", report.failure_lines),
        );
        let text = String::from_utf8_lossy(excerpt);
        let _ = writeln!(output, "{}", text.trim_matches('\n'));
    }

    if !report.annotations.is_empty() {
        add_section_header(&mut output, "Annotations");
        for annotation in report.annotations {
            let context = annotation.context.as_deref().unwrap_or("annotation");
            let _ = writeln!(output, "{}", cyan(context));
            let text = annotation_text(&annotation.body_html, annotation_width());
            if !text.is_empty() {
                let _ = writeln!(output, "{text}\n");
            }
        }
    }

    if let Some(url) = build.pull_request.as_ref().and_then(|pr| pr.url()) {
        let _ = writeln!(output, "\n{} {}", dim("Pull request:"), cyan(url));
    }

    let elapsed = humantime::format_duration(report.elapsed);
    if build.state.is_failure() {
        let _ = writeln!(
            output,
            "\n{} {}",
            bright_red(format!("Build #{} on {} failed after {elapsed}.", build.number, build.branch)),
            dim(format!("URL: {}", build.web_url))
        );
    } else {
        let _ = writeln!(
            output,
            "\n{}",
            bright_green(format!("Tests on {} took {elapsed}. Quitting.", build.branch))
        );
    }

    output
}

/// Renders annotation HTML for the terminal.
pub fn annotation_text(html: &str, width: usize) -> String {
    let markdown = annotation_markdown(html);
    let rendered = MadSkin::default().text(&markdown, Some(width)).to_string();
    rendered
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn annotation_width() -> usize {
    console::Term::stdout()
        .size_checked()
        .map_or(MAX_ANNOTATION_WIDTH, |(_, cols)| usize::from(cols))
        .min(MAX_ANNOTATION_WIDTH)
}

/// Converts the HTML Buildkite renders annotations into to markdown.
///
/// Block elements become paragraphs, list items become `- ` lines and
/// `<pre>` blocks become fenced code. Anything else is reduced to its text.
pub fn annotation_markdown(html: &str) -> String {
    let mut markdown = String::new();
    let mut rest = 0;
    for block in PRE_BLOCK.captures_iter(html) {
        let (Some(whole), Some(body)) = (block.get(0), block.get(1)) else {
            continue;
        };
        markdown.push_str(&html_to_markdown(&html[rest..whole.start()]));
        let code = decode_entities(&HTML_TAG.replace_all(body.as_str(), ""));
        let _ = write!(markdown, "\n\n```\n{}\n```\n\n", code.trim_matches('\n'));
        rest = whole.end();
    }
    markdown.push_str(&html_to_markdown(&html[rest..]));
    tidy_markdown(&markdown)
}

fn html_to_markdown(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, |tag: &Captures| {
        tag_markdown(&tag[2].to_ascii_lowercase(), !tag[1].is_empty())
    });
    decode_entities(&text)
}

fn tag_markdown(name: &str, closing: bool) -> Cow<'static, str> {
    let markdown = match (name, closing) {
        ("br", _) => "\n",
        ("h1" | "h2" | "h3" | "h4" | "h5" | "h6", false) => {
            let level = name[1..].parse().unwrap_or(1);
            return Cow::Owned(format!("\n\n{} ", "#".repeat(level)));
        }
        (
            "p" | "div" | "ul" | "ol" | "table" | "blockquote" | "details" | "summary" | "hr"
            | "h1" | "h2" | "h3" | "h4" | "h5" | "h6",
            _,
        ) => "\n\n",
        ("li", false) => "\n- ",
        ("tr", true) => "\n",
        ("td" | "th", true) => " ",
        ("code" | "kbd" | "samp", _) => "`",
        ("b" | "strong", _) => "**",
        ("i" | "em", _) => "*",
        _ => "",
    };
    Cow::Borrowed(markdown)
}

/// Decodes numeric character references and the common named entities.
/// Unknown names are left as written.
fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |entity: &Captures| {
            let name = &entity[1];
            let decoded = match name.strip_prefix('#') {
                Some(code) => code
                    .strip_prefix(['x', 'X'])
                    .map_or_else(|| code.parse().ok(), |hex| u32::from_str_radix(hex, 16).ok())
                    .and_then(char::from_u32),
                None => named_entity(name),
            };
            decoded.map_or_else(|| entity[0].to_string(), String::from)
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "hellip" => '\u{2026}',
        "bull" => '\u{2022}',
        "middot" => '\u{b7}',
        "times" => '\u{d7}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "check" => '\u{2713}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        _ => return None,
    })
}

/// Trims lines outside code fences, keeps at most one blank line in a row
/// and drops blank lines between list items.
fn tidy_markdown(markdown: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut pending_blank = false;
    for raw in markdown.lines() {
        let line = if in_fence { raw.trim_end() } else { raw.trim() };
        if line.starts_with("```") {
            in_fence = !in_fence;
        } else if line.is_empty() && !in_fence {
            pending_blank = !lines.is_empty();
            continue;
        }
        let joins_list = line.starts_with("- ") && lines.last().is_some_and(|l| l.starts_with("- "));
        if pending_blank && !joins_list {
            lines.push("");
        }
        pending_blank = false;
        lines.push(line);
    }
    lines.join("\n")
}
