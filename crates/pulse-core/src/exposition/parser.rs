//! Text exposition parser.
//!
//! Accepts the classic line-oriented format: optional `# HELP` / `# TYPE`
//! metadata followed by one sample per line,
//! `name{label="value",...} value [timestamp_ms]`.
//!
//! Samples of histograms (`_bucket`, `_sum`, `_count`) and summaries
//! (`{quantile=...}`, `_sum`, `_count`) are folded into one metric per label
//! set. Samples for a name seen earlier in the payload join the existing
//! family, so a family split across blocks yields one family.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use super::model::{Label, Metric, MetricFamily, MetricType, Value};

/// Structurally invalid exposition input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number, 0 for whole-payload problems.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Removes every line that starts with `#`.
///
/// All other lines are passed through unchanged, each followed by `\n`. Used
/// for sources known to emit duplicate `HELP`/`TYPE` blocks, which the parser
/// rejects.
pub fn strip_metadata_comments(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for line in payload.split(|b| *b == b'\n') {
        if line.first() == Some(&b'#') {
            continue;
        }
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    // `split` yields a trailing empty slice for payloads ending in '\n'.
    if payload.last() == Some(&b'\n') || payload.is_empty() {
        out.pop();
    }
    out
}

/// Parses a text exposition payload into families, in first-seen order.
pub fn parse_families(payload: &[u8]) -> Result<Vec<MetricFamily>, ParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ParseError::new(0, format!("payload is not valid UTF-8: {e}")))?;

    let mut parser = FamilyParser::default();
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            parser.comment(comment, lineno)?;
        } else {
            let sample = parse_sample(line, lineno)?;
            parser.sample(sample, lineno)?;
        }
    }

    Ok(parser.finish())
}

#[derive(Debug)]
struct FamilyState {
    family: MetricFamily,
    typed: bool,
}

#[derive(Debug, Default)]
struct FamilyParser {
    families: Vec<FamilyState>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug)]
struct Sample {
    name: String,
    labels: Vec<Label>,
    value: f64,
    timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Plain,
    Bucket,
    Sum,
    Count,
}

impl FamilyParser {
    fn family_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.by_name.get(name) {
            return *idx;
        }
        let idx = self.families.len();
        self.families.push(FamilyState {
            family: MetricFamily::new(name, MetricType::Untyped),
            typed: false,
        });
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    fn comment(&mut self, comment: &str, lineno: usize) -> Result<(), ParseError> {
        let comment = comment.trim_start();
        let (keyword, tail) = comment
            .split_once(char::is_whitespace)
            .unwrap_or((comment, ""));
        if keyword != "HELP" && keyword != "TYPE" {
            return Ok(());
        }

        let tail = tail.trim_start();
        let (name, rest) = tail.split_once(char::is_whitespace).unwrap_or((tail, ""));
        if name.is_empty() {
            return Err(ParseError::new(
                lineno,
                format!("{keyword} line without metric name"),
            ));
        }
        if !is_metric_name(name) {
            return Err(ParseError::new(lineno, format!("invalid metric name {name:?}")));
        }
        let rest = rest.trim();

        let idx = self.family_index(name);
        let state = &mut self.families[idx];

        if keyword == "HELP" {
            if state.family.help.is_some() {
                return Err(ParseError::new(
                    lineno,
                    format!("second HELP line for metric name {name:?}"),
                ));
            }
            state.family.help = Some(unescape_help(rest));
            return Ok(());
        }

        if state.typed {
            return Err(ParseError::new(
                lineno,
                format!("second TYPE line for metric name {name:?}"),
            ));
        }
        if !state.family.metrics.is_empty() {
            return Err(ParseError::new(
                lineno,
                format!("TYPE line for metric name {name:?} after its samples"),
            ));
        }
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            return Err(ParseError::new(lineno, format!("invalid TYPE line for {name:?}")));
        }
        state.family.kind = MetricType::from_token(rest);
        state.typed = true;
        Ok(())
    }

    fn route(&self, name: &str) -> Option<(usize, Role)> {
        let typed_base = |suffix: &str, accept: &dyn Fn(&MetricType) -> bool| {
            let base = name.strip_suffix(suffix)?;
            let idx = *self.by_name.get(base)?;
            accept(&self.families[idx].family.kind).then_some(idx)
        };

        let is_histogram = |k: &MetricType| *k == MetricType::Histogram;
        let is_hist_or_summary =
            |k: &MetricType| matches!(k, MetricType::Histogram | MetricType::Summary);

        if let Some(idx) = typed_base("_bucket", &is_histogram) {
            return Some((idx, Role::Bucket));
        }
        if let Some(idx) = typed_base("_sum", &is_hist_or_summary) {
            return Some((idx, Role::Sum));
        }
        if let Some(idx) = typed_base("_count", &is_hist_or_summary) {
            return Some((idx, Role::Count));
        }
        self.by_name.get(name).map(|idx| (*idx, Role::Plain))
    }

    fn sample(&mut self, sample: Sample, lineno: usize) -> Result<(), ParseError> {
        let (idx, role) = match self.route(&sample.name) {
            Some(found) => found,
            None => (self.family_index(&sample.name), Role::Plain),
        };
        let family = &mut self.families[idx].family;

        match family.kind.clone() {
            MetricType::Histogram => fold_histogram(family, sample, role, lineno),
            MetricType::Summary => fold_summary(family, sample, role, lineno),
            kind => {
                let value = match kind {
                    MetricType::Counter => Value::Counter(sample.value),
                    MetricType::Gauge => Value::Gauge(sample.value),
                    MetricType::Other(_) => Value::Other(sample.value),
                    _ => Value::Untyped(sample.value),
                };
                let mut metric = Metric::new(value);
                for label in sample.labels {
                    metric.set_label(label.name, label.value);
                }
                metric.timestamp_ms = sample.timestamp_ms;
                family.push(metric);
                Ok(())
            }
        }
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families.into_iter().map(|s| s.family).collect()
    }
}

/// Finds (or creates) the metric of a histogram/summary family whose labels,
/// minus the `reserved` one, equal `labels`.
fn grouped_metric<'a>(
    family: &'a mut MetricFamily,
    labels: &[Label],
    reserved: &str,
) -> &'a mut Metric {
    let mut key: Vec<&Label> = labels.iter().filter(|l| l.name != reserved).collect();
    key.sort();

    let position = family.metrics.iter().position(|m| {
        let mut existing: Vec<&Label> = m.labels().iter().collect();
        existing.sort();
        existing == key
    });

    let pos = match position {
        Some(pos) => pos,
        None => {
            let mut metric = Metric::new(Value::empty_for(&family.kind));
            for label in key {
                metric.set_label(label.name.clone(), label.value.clone());
            }
            family.metrics.push(metric);
            family.metrics.len() - 1
        }
    };
    &mut family.metrics[pos]
}

fn reserved_label(sample: &Sample, name: &str, lineno: usize) -> Result<f64, ParseError> {
    let raw = sample
        .labels
        .iter()
        .find(|l| l.name == name)
        .map(|l| l.value.as_str())
        .ok_or_else(|| {
            ParseError::new(lineno, format!("sample {:?} lacks {name:?} label", sample.name))
        })?;
    parse_float(raw).ok_or_else(|| ParseError::new(lineno, format!("invalid {name} value {raw:?}")))
}

fn fold_histogram(
    family: &mut MetricFamily,
    sample: Sample,
    role: Role,
    lineno: usize,
) -> Result<(), ParseError> {
    let upper = match role {
        Role::Bucket => Some(reserved_label(&sample, "le", lineno)?),
        Role::Plain => {
            return Err(ParseError::new(
                lineno,
                format!("histogram sample {:?} lacks _bucket/_sum/_count suffix", sample.name),
            ));
        }
        _ => None,
    };

    let metric = grouped_metric(family, &sample.labels, "le");
    metric.timestamp_ms = sample.timestamp_ms.or(metric.timestamp_ms);
    if let Value::Histogram(h) = &mut metric.value {
        match (role, upper) {
            (Role::Bucket, Some(le)) => h.buckets.push((le, sample.value as u64)),
            (Role::Sum, _) => h.sum = sample.value,
            (Role::Count, _) => h.count = sample.value as u64,
            _ => {}
        }
    }
    Ok(())
}

fn fold_summary(
    family: &mut MetricFamily,
    sample: Sample,
    role: Role,
    lineno: usize,
) -> Result<(), ParseError> {
    let quantile = match role {
        Role::Plain => Some(reserved_label(&sample, "quantile", lineno)?),
        _ => None,
    };

    let metric = grouped_metric(family, &sample.labels, "quantile");
    metric.timestamp_ms = sample.timestamp_ms.or(metric.timestamp_ms);
    if let Value::Summary(s) = &mut metric.value {
        match (role, quantile) {
            (Role::Plain, Some(q)) => s.quantiles.push((q, sample.value)),
            (Role::Sum, _) => s.sum = sample.value,
            (Role::Count, _) => s.count = sample.value as u64,
            _ => {}
        }
    }
    Ok(())
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

fn unescape_help(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn skip_ws(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

fn parse_sample(line: &str, lineno: usize) -> Result<Sample, ParseError> {
    let err = |msg: String| ParseError::new(lineno, msg);

    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_metric_name(name) {
        return Err(err(format!("invalid metric name {name:?}")));
    }

    let mut labels: Vec<Label> = Vec::new();
    let mut rest = &line[name_end..];

    if rest.starts_with('{') {
        let mut chars = rest.char_indices().peekable();
        chars.next();
        let close = loop {
            skip_ws(&mut chars);
            match chars.peek().copied() {
                Some((pos, '}')) => break pos,
                Some(_) => {}
                None => return Err(err("unterminated label set".to_string())),
            }

            let mut label_name = String::new();
            while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_') {
                label_name.push(c);
            }
            if !is_label_name(&label_name) {
                return Err(err(format!("invalid label name {label_name:?}")));
            }
            skip_ws(&mut chars);
            if chars.next().map(|(_, c)| c) != Some('=') {
                return Err(err(format!("expected '=' after label {label_name:?}")));
            }
            skip_ws(&mut chars);
            if chars.next().map(|(_, c)| c) != Some('"') {
                return Err(err(format!("expected '\"' for label {label_name:?}")));
            }

            let mut value = String::new();
            loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, '"')) => value.push('"'),
                        Some((_, '\\')) => value.push('\\'),
                        Some((_, other)) => {
                            return Err(err(format!("invalid escape \\{other} in label value")));
                        }
                        None => return Err(err("unterminated label value".to_string())),
                    },
                    Some((_, c)) => value.push(c),
                    None => return Err(err("unterminated label value".to_string())),
                }
            }

            if labels.iter().any(|l| l.name == label_name) {
                return Err(err(format!("duplicate label name {label_name:?}")));
            }
            labels.push(Label::new(label_name, value));

            skip_ws(&mut chars);
            match chars.peek().copied() {
                Some((_, ',')) => {
                    chars.next();
                }
                Some((_, '}')) => {}
                _ => return Err(err("expected ',' or '}' in label set".to_string())),
            }
        };
        rest = &rest[close + 1..];
    }

    let mut tokens = rest.split_whitespace();
    let raw_value = tokens
        .next()
        .ok_or_else(|| err(format!("sample {name:?} has no value")))?;
    let value = parse_float(raw_value).ok_or_else(|| err(format!("invalid value {raw_value:?}")))?;
    let timestamp_ms = tokens
        .next()
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| err(format!("invalid timestamp {raw:?}")))
        })
        .transpose()?;
    if tokens.next().is_some() {
        return Err(err(format!("trailing data after sample {name:?}")));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_counter_and_gauge_families() {
        let payload = b"\
# HELP http_requests_total Total requests.
# TYPE http_requests_total counter
http_requests_total{method=\"get\",code=\"200\"} 1027 1395066363000
http_requests_total{method=\"post\",code=\"400\"} 3
# TYPE temperature gauge
temperature 21.5
";
        let families = parse_families(payload).unwrap();
        assert_eq!(families.len(), 2);

        let requests = &families[0];
        assert_eq!(requests.name, "http_requests_total");
        assert_eq!(requests.kind, MetricType::Counter);
        assert_eq!(requests.help.as_deref(), Some("Total requests."));
        assert_eq!(requests.metrics.len(), 2);
        assert_eq!(requests.metrics[0].label("method"), Some("get"));
        assert_eq!(requests.metrics[0].value, Value::Counter(1027.0));
        assert_eq!(requests.metrics[0].timestamp_ms, Some(1395066363000));

        assert_eq!(families[1].metrics[0].value, Value::Gauge(21.5));
    }

    #[test]
    fn folds_histogram_samples() {
        let payload = b"\
# TYPE rpc_duration_seconds histogram
rpc_duration_seconds_bucket{service=\"a\",le=\"0.1\"} 2
rpc_duration_seconds_bucket{service=\"a\",le=\"+Inf\"} 5
rpc_duration_seconds_sum{service=\"a\"} 1.75
rpc_duration_seconds_count{service=\"a\"} 5
rpc_duration_seconds_bucket{service=\"b\",le=\"+Inf\"} 1
rpc_duration_seconds_sum{service=\"b\"} 0.5
rpc_duration_seconds_count{service=\"b\"} 1
";
        let families = parse_families(payload).unwrap();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.metrics.len(), 2);

        let Value::Histogram(h) = &family.metrics[0].value else {
            panic!("expected histogram payload");
        };
        assert_eq!(h.sum, 1.75);
        assert_eq!(h.count, 5);
        assert_eq!(h.buckets, vec![(0.1, 2), (f64::INFINITY, 5)]);
        assert_eq!(family.metrics[0].labels(), &[Label::new("service", "a")]);
    }

    #[test]
    fn folds_summary_samples() {
        let payload = b"\
# TYPE gc_pause_seconds summary
gc_pause_seconds{quantile=\"0.5\"} 0.01
gc_pause_seconds{quantile=\"0.99\"} 0.2
gc_pause_seconds_sum 3.5
gc_pause_seconds_count 120
";
        let families = parse_families(payload).unwrap();
        let Value::Summary(s) = &families[0].metrics[0].value else {
            panic!("expected summary payload");
        };
        assert_eq!(s.sum, 3.5);
        assert_eq!(s.count, 120);
        assert_eq!(s.quantiles.len(), 2);
        assert!(families[0].metrics[0].labels().is_empty());
    }

    #[test]
    fn untyped_samples_without_metadata() {
        let families = parse_families(b"up 1\nup{job=\"x\"} 0\n").unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].kind, MetricType::Untyped);
        assert_eq!(families[0].metrics.len(), 2);
    }

    #[test]
    fn unknown_type_token_parses_as_other() {
        let families = parse_families(b"# TYPE build info\nbuild{version=\"1\"} 1\n").unwrap();
        assert_eq!(families[0].kind, MetricType::Other("info".to_string()));
        assert_eq!(families[0].metrics[0].value, Value::Other(1.0));
    }

    #[test]
    fn duplicate_type_block_is_rejected() {
        let payload = b"\
# HELP vts_requests Requests.
# TYPE vts_requests counter
vts_requests{zone=\"a\"} 1
# HELP vts_requests Requests.
# TYPE vts_requests counter
vts_requests{zone=\"b\"} 2
";
        let err = parse_families(payload).unwrap_err();
        assert_eq!(err.line, 4);
    }

    #[test]
    fn stripped_duplicate_blocks_yield_single_family() {
        let payload = b"\
# HELP vts_requests Requests.
# TYPE vts_requests counter
vts_requests{zone=\"a\"} 1
# HELP vts_requests Requests.
# TYPE vts_requests counter
vts_requests{zone=\"b\"} 2
";
        let families = parse_families(&strip_metadata_comments(payload)).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "vts_requests");
        assert_eq!(families[0].metrics.len(), 2);
        assert_eq!(families[0].metrics[1].label("zone"), Some("b"));
    }

    #[test]
    fn label_value_escapes() {
        let families =
            parse_families(b"msg{text=\"a \\\"quoted\\\" \\\\ line\\nbreak\",} 1\n").unwrap();
        assert_eq!(
            families[0].metrics[0].label("text"),
            Some("a \"quoted\" \\ line\nbreak")
        );
    }

    #[test]
    fn special_float_values() {
        let families = parse_families(b"a +Inf\nb -Inf\nc NaN\n").unwrap();
        assert_eq!(families[0].metrics[0].value.scalar(), f64::INFINITY);
        assert_eq!(families[1].metrics[0].value.scalar(), f64::NEG_INFINITY);
        assert!(families[2].metrics[0].value.scalar().is_nan());
    }

    #[test]
    fn structural_errors() {
        for bad in [
            &b"1metric 1\n"[..],
            b"m{a=\"1\" 1\n",
            b"m{a=1} 1\n",
            b"m{a=\"1\",a=\"2\"} 1\n",
            b"m\n",
            b"m abc\n",
            b"m 1 2 3\n",
            b"# TYPE m\n",
            b"m 1\n# TYPE m gauge\n",
            b"# TYPE h histogram\nh 1\n",
            b"# TYPE h histogram\nh_bucket 1\n",
            b"\xff\xfe 1\n",
        ] {
            assert!(
                parse_families(bad).is_err(),
                "{:?} should not parse",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn strip_keeps_non_comment_lines_verbatim() {
        let payload = b"# HELP a x\na 1\n  # indented stays\nb{l=\"#\"} 2\n";
        let stripped = strip_metadata_comments(payload);
        assert_eq!(stripped, b"a 1\n  # indented stays\nb{l=\"#\"} 2\n");
    }

    #[test]
    fn strip_is_idempotent() {
        for payload in [
            &b"# TYPE a gauge\na 1\n"[..],
            b"a 1",
            b"",
            b"\n\n# x\n",
            b"#only",
        ] {
            let once = strip_metadata_comments(payload);
            let twice = strip_metadata_comments(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn strip_terminates_last_line() {
        assert_eq!(strip_metadata_comments(b"a 1"), b"a 1\n");
    }
}
