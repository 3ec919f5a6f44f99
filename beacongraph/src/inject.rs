// beacongraph/src/inject.rs
//
// Synthetic beacon injection for evaluation runs: replays an existing
// proxy log and plants one request to a marker domain every `period_ms`,
// in the input's own format, so the detection pipeline can be scored
// against known-bad traffic.

use std::io::{BufRead, Write};

use tracing::info;

use crate::logparse::{to_json_line, to_squid_line, LogFormat, LogParser};
use crate::model::Request;

#[derive(Debug, Clone)]
pub struct InjectionReport {
    pub domain: String,
    pub injected: usize,
}

/// The synthetic request a beacon emits at `time`.
fn beacon_request(time: i64, domain: &str, user: &str) -> Request {
    Request {
        time,
        elapsed: 10,
        client: user.to_string(),
        code: "TCP_MISS".to_string(),
        status: 200,
        bytes: 512,
        method: "GET".to_string(),
        url: format!("http://{domain}/"),
        domain: domain.to_string(),
        peerstatus: "HIER_DIRECT".to_string(),
        peerhost: "127.0.0.1".to_string(),
        content_type: "text/html".to_string(),
    }
}

fn write_line<W: Write>(out: &mut W, request: &Request, format: LogFormat) -> std::io::Result<()> {
    let line = match format {
        LogFormat::Squid => to_squid_line(request),
        LogFormat::Json => to_json_line(request),
    };
    writeln!(out, "{line}")
}

/// Copy a log while injecting a periodic beacon to `domain` from `user`.
/// Whenever the log clock passes another `period_ms` window, one synthetic
/// request is planted before the triggering line, keeping the output in
/// time order.
pub fn periodic_apt<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    domain: &str,
    user: &str,
    format: LogFormat,
    period_ms: i64,
) -> std::io::Result<InjectionReport> {
    let parser = LogParser::new();
    let mut injected = 0usize;
    let mut clock: Option<i64> = None;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parser.parse_line(&line, format) {
            Ok(request) => {
                match clock {
                    None => clock = Some(request.time),
                    Some(mut time) => {
                        while time + period_ms < request.time {
                            time += period_ms;
                            write_line(&mut output, &beacon_request(time, domain, user), format)?;
                            injected += 1;
                        }
                        clock = Some(time);
                    }
                }
                writeln!(output, "{line}")?;
            }
            Err(_) => {
                // Pass unparseable lines through untouched.
                writeln!(output, "{line}")?;
            }
        }
    }

    info!(domain, injected, "periodic beacon injected");
    Ok(InjectionReport {
        domain: domain.to_string(),
        injected,
    })
}
