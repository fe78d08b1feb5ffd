//! Samples from Prometheus text exposition input
//!
//! Parsing is done by `prometheus-parse`; lines it cannot read are skipped.
//! Histogram and summary groups are flattened back into one sample per
//! bucket (`<name>_bucket{le=..}`) or quantile (`<name>{quantile=..}`).

use anyhow::{Context, Result};
use chrono::DateTime;
use paths::{METRIC_NAME_LABEL, Metric, Sample};
use prometheus_parse::{Scrape, Value};

/// Parse every sample of `input`. Samples without a timestamp get `now_ms`.
pub fn parse_samples(input: &str, now_ms: i64) -> Result<Vec<Sample>> {
    let sample_time = DateTime::from_timestamp_millis(now_ms)
        .context("current time is out of range")?;
    let lines = input
        .lines()
        .map(|line| Ok::<_, std::io::Error>(line.to_string()));
    let scrape = Scrape::parse_at(lines, sample_time)
        .context("could not parse input as Prometheus text format")?;

    let mut samples = Vec::with_capacity(scrape.samples.len());
    for sample in scrape.samples {
        let timestamp = sample.timestamp.timestamp_millis();
        let metric = sample
            .labels
            .iter()
            .fold(Metric::new(&sample.metric), |metric, (name, value)| {
                metric.with_label(name, value)
            });

        match sample.value {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => {
                samples.push(Sample::new(metric, v, timestamp));
            }
            Value::Histogram(buckets) => {
                let name = bucket_name(&sample.metric);
                for bucket in buckets {
                    let bucket_metric = metric
                        .clone()
                        .with_label(METRIC_NAME_LABEL, &name)
                        .with_label("le", &format_bound(bucket.less_than));
                    samples.push(Sample::new(bucket_metric, bucket.count, timestamp));
                }
            }
            Value::Summary(quantiles) => {
                for quantile in quantiles {
                    let quantile_metric = metric
                        .clone()
                        .with_label("quantile", &format_bound(quantile.quantile));
                    samples.push(Sample::new(quantile_metric, quantile.count, timestamp));
                }
            }
        }
    }
    Ok(samples)
}

fn bucket_name(metric: &str) -> String {
    if metric.ends_with("_bucket") {
        metric.to_string()
    } else {
        format!("{metric}_bucket")
    }
}

fn format_bound(bound: f64) -> String {
    if bound == f64::INFINITY {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}
