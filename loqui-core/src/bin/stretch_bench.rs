//! Offline time-stretch benchmark.
//!
//! Sweeps the stretch engine over a set of WAV fixtures (or built-in
//! synthetic signals when no fixtures directory exists) at several playback
//! rates, reporting per-rate latency percentiles, realtime factors and
//! duration-ratio error as pretty-printed JSON.

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("stretch_bench failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use loqui_core::TimeStretcher;
    use serde::Serialize;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        fixtures_dir: PathBuf,
        iterations: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseResult {
        signal: String,
        rate: f32,
        iteration: usize,
        input_secs: f64,
        output_secs: f64,
        /// `output_secs / (input_secs / rate)` — 1.0 is a perfect stretch.
        duration_ratio: f64,
        latency_ms: f64,
        /// Input seconds processed per wall-clock second.
        realtime_factor: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct RateSummary {
        rate: f32,
        runs: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_realtime_factor: f64,
        max_duration_ratio_error: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        fixtures_dir: String,
        iterations: usize,
        total_runs: usize,
        synthetic_signals: bool,
        rates: Vec<RateSummary>,
        cases: Vec<CaseResult>,
    }

    const RATES: &[f32] = &[0.5, 0.75, 1.0, 1.25, 1.5, 2.0];
    const SYNTH_RATE: u32 = 24_000;

    fn parse_args() -> Result<Args, String> {
        let mut fixtures_dir: Option<PathBuf> = None;
        let mut iterations: usize = 3;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--fixtures" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --fixtures".into());
                    };
                    fixtures_dir = Some(PathBuf::from(v));
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 50);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p loqui-core --bin stretch_bench -- \\
  [--fixtures <dir>] [--iterations <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(Args {
            fixtures_dir: fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures")),
            iterations,
            output,
        })
    }

    fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
        for entry in std::fs::read_dir(dir).map_err(|e| e.to_string())? {
            let path = entry.map_err(|e| e.to_string())?.path();
            if path.is_dir() {
                collect_wavs(&path, out)?;
            } else if path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("wav"))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(())
    }

    fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32), String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .map(|s| {
                    s.map(|v| f32::from(v) / f32::from(i16::MAX))
                        .map_err(|e| e.to_string())
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        if channels == 1 {
            return Ok((interleaved, spec.sample_rate));
        }
        let mono = interleaved
            .chunks(channels)
            .map(|f| f.iter().sum::<f32>() / channels as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    }

    /// Deterministic stand-ins for speech when no fixtures are on disk.
    fn synthetic_signals() -> Vec<(String, Vec<f32>, u32)> {
        let tone = |hz: f32, secs: f32| -> Vec<f32> {
            (0..(secs * SYNTH_RATE as f32) as usize)
                .map(|i| {
                    (2.0 * std::f32::consts::PI * hz * i as f32 / SYNTH_RATE as f32).sin() * 0.5
                })
                .collect()
        };
        let sweep: Vec<f32> = (0..(3.0 * SYNTH_RATE as f32) as usize)
            .map(|i| {
                let t = i as f32 / SYNTH_RATE as f32;
                let hz = 100.0 + 400.0 * t;
                (2.0 * std::f32::consts::PI * hz * t).sin() * 0.4
            })
            .collect();
        vec![
            ("tone_200hz_1s".into(), tone(200.0, 1.0), SYNTH_RATE),
            ("tone_440hz_5s".into(), tone(440.0, 5.0), SYNTH_RATE),
            ("sweep_100_1300hz_3s".into(), sweep, SYNTH_RATE),
        ]
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    let args = parse_args()?;

    let mut signals: Vec<(String, Vec<f32>, u32)> = Vec::new();
    let synthetic = !args.fixtures_dir.exists();
    if synthetic {
        println!(
            "no fixtures at {}, using synthetic signals",
            args.fixtures_dir.display()
        );
        signals = synthetic_signals();
    } else {
        let mut wavs = Vec::new();
        collect_wavs(&args.fixtures_dir, &mut wavs)?;
        wavs.sort();
        if wavs.is_empty() {
            return Err(format!(
                "no .wav fixtures found in {}",
                args.fixtures_dir.display()
            ));
        }
        for wav in &wavs {
            let (samples, sample_rate) = read_wav_mono_f32(wav)?;
            let name = wav
                .strip_prefix(&args.fixtures_dir)
                .unwrap_or(wav)
                .display()
                .to_string();
            signals.push((name, samples, sample_rate));
        }
    }

    println!(
        "Running stretch benchmark on {} signals × {} rates (iterations={})",
        signals.len(),
        RATES.len(),
        args.iterations
    );

    let stretcher = TimeStretcher::new();
    let mut cases = Vec::new();
    for (name, samples, sample_rate) in &signals {
        let input_secs = samples.len() as f64 / f64::from(*sample_rate);
        for &rate in RATES {
            for iteration in 1..=args.iterations {
                let started = Instant::now();
                let out = stretcher
                    .stretch(samples, rate)
                    .map_err(|e| format!("{name} at rate {rate}: {e}"))?;
                let latency = started.elapsed().as_secs_f64();

                let output_secs = out.len() as f64 / f64::from(*sample_rate);
                let ideal_secs = input_secs / f64::from(rate);
                cases.push(CaseResult {
                    signal: name.clone(),
                    rate,
                    iteration,
                    input_secs,
                    output_secs,
                    duration_ratio: output_secs / ideal_secs,
                    latency_ms: latency * 1000.0,
                    realtime_factor: input_secs / latency.max(1e-9),
                });
            }
            println!("{name} rate={rate:.2} done");
        }
    }

    let rates = RATES
        .iter()
        .map(|&rate| {
            let rows: Vec<&CaseResult> = cases.iter().filter(|c| c.rate == rate).collect();
            let latencies: Vec<f64> = rows.iter().map(|r| r.latency_ms).collect();
            let rtf: Vec<f64> = rows.iter().map(|r| r.realtime_factor).collect();
            RateSummary {
                rate,
                runs: rows.len(),
                p50_latency_ms: percentile(&latencies, 0.50),
                p95_latency_ms: percentile(&latencies, 0.95),
                avg_realtime_factor: if rtf.is_empty() {
                    0.0
                } else {
                    rtf.iter().sum::<f64>() / rtf.len() as f64
                },
                max_duration_ratio_error: rows
                    .iter()
                    .map(|r| (r.duration_ratio - 1.0).abs())
                    .fold(0.0, f64::max),
            }
        })
        .collect::<Vec<_>>();

    for r in &rates {
        println!(
            "rate={:.2} p50={:.2}ms p95={:.2}ms rtf={:.0}x max_ratio_err={:.3}",
            r.rate, r.p50_latency_ms, r.p95_latency_ms, r.avg_realtime_factor, r.max_duration_ratio_error
        );
    }

    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        iterations: args.iterations,
        total_runs: cases.len(),
        synthetic_signals: synthetic,
        rates,
        cases,
    };

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
