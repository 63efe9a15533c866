//! Text exposition encoder (format version 0.0.4).

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::sample::{MetricSample, MetricSet};

/// Content type of the encoded output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encode a metric set.
///
/// Samples are grouped by family in order of first appearance; each family
/// gets one `# HELP` and one `# TYPE` line taken from its first sample. Every
/// sample is validated first, and samples sharing a family name must agree on
/// help text and kind.
pub fn encode(set: &MetricSet) -> Result<String> {
    let mut families: Vec<(String, Vec<&MetricSample>)> = Vec::new();

    for sample in set.samples() {
        sample.validate()?;
        let name = sample.family_name();

        match families.iter_mut().find(|(n, _)| *n == name) {
            Some((_, members)) => {
                let first = members[0];
                if first.kind != sample.kind || first.help != sample.help {
                    return Err(Error::ConflictingFamily(name));
                }
                members.push(sample);
            }
            None => families.push((name, vec![sample])),
        }
    }

    let mut output = String::with_capacity(set.len() * 96);
    for (name, members) in &families {
        let first = members[0];
        writeln!(output, "# HELP {} {}", name, escape_help(&first.help)).ok();
        writeln!(output, "# TYPE {} {}", name, first.kind.as_str()).ok();

        for sample in members {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(sample),
                format_value(sample.value)
            )
            .ok();
        }
    }

    Ok(output)
}

fn format_labels(sample: &MetricSample) -> String {
    if sample.labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = sample
        .labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    let mut result = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
