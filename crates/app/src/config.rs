use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use traffic_core::{DEFAULT_MIN_CONFIDENCE, SignalConfig};

const SERVE_USAGE: &str = "Usage: traffic-app serve --video <path> [--video <path>...] \
--model <path> [--port <n>] [--width <px>] [--height <px>] \
[--detector-width <px>] [--detector-height <px>] [--confidence <0-1>] \
[--jpeg-quality <1-100>] [--cpu] [--verbose] [--seed <n>] \
[--min-green <s>] [--base-green <s>] [--max-green <s>] [--red-time <s>] \
[--vehicle-increment <f>] [--max-waiting-penalty <f>] \
[--low-threshold <n>] [--medium-threshold <n>] [--bottleneck-threshold <n>]\n\n\
Positional form is also supported: serve <video> [<video>...]";

/// Immutable process configuration, parsed once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Camera source URIs: video file paths or device indices.
    pub cameras: Vec<String>,
    pub model_path: PathBuf,
    pub port: u16,
    /// Native processing resolution frames are decoded at.
    pub width: i32,
    pub height: i32,
    /// Resolution the detector runs at; boxes are rescaled back afterwards.
    pub detector_width: i32,
    pub detector_height: i32,
    pub min_confidence: f32,
    pub jpeg_quality: i32,
    pub use_cpu: bool,
    pub verbose: bool,
    /// Seeds the waiting-time jitter per camera when set; entropy otherwise.
    pub seed: Option<u64>,
    pub signal: SignalConfig,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            bail!(SERVE_USAGE);
        }

        let mut cameras: Vec<String> = Vec::new();
        let mut model_path: Option<PathBuf> = None;
        let mut port: u16 = 8000;
        let mut width: i32 = 1280;
        let mut height: i32 = 720;
        let mut detector_width: i32 = 640;
        let mut detector_height: i32 = 360;
        let mut min_confidence: f32 = DEFAULT_MIN_CONFIDENCE;
        let mut jpeg_quality: i32 = 85;
        let mut use_cpu = false;
        let mut verbose = false;
        let mut seed: Option<u64> = None;
        let mut signal = SignalConfig::default();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--video" => cameras.push(take_value(args, &mut idx, "--video")?),
                "--model" => {
                    model_path = Some(PathBuf::from(take_value(args, &mut idx, "--model")?));
                }
                "--port" => port = parse(args, &mut idx, "--port")?,
                "--width" => width = parse_positive(args, &mut idx, "--width")?,
                "--height" => height = parse_positive(args, &mut idx, "--height")?,
                "--detector-width" => {
                    detector_width = parse_positive(args, &mut idx, "--detector-width")?;
                }
                "--detector-height" => {
                    detector_height = parse_positive(args, &mut idx, "--detector-height")?;
                }
                "--confidence" => {
                    let value: f32 = parse(args, &mut idx, "--confidence")?;
                    if !(0.0..=1.0).contains(&value) {
                        bail!("--confidence must be between 0 and 1");
                    }
                    min_confidence = value;
                }
                "--jpeg-quality" => {
                    let value: i32 = parse(args, &mut idx, "--jpeg-quality")?;
                    if !(1..=100).contains(&value) {
                        bail!("--jpeg-quality must be an integer between 1 and 100");
                    }
                    jpeg_quality = value;
                }
                "--cpu" => {
                    use_cpu = true;
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                "--seed" => seed = Some(parse(args, &mut idx, "--seed")?),
                "--min-green" => signal.min_green = parse(args, &mut idx, "--min-green")?,
                "--base-green" => signal.base_green = parse(args, &mut idx, "--base-green")?,
                "--max-green" => signal.max_green = parse(args, &mut idx, "--max-green")?,
                "--red-time" => signal.red_time = parse(args, &mut idx, "--red-time")?,
                "--vehicle-increment" => {
                    signal.vehicle_increment = parse(args, &mut idx, "--vehicle-increment")?;
                }
                "--max-waiting-penalty" => {
                    signal.max_waiting_penalty = parse(args, &mut idx, "--max-waiting-penalty")?;
                }
                "--low-threshold" => {
                    signal.low_threshold = parse(args, &mut idx, "--low-threshold")?;
                }
                "--medium-threshold" => {
                    signal.medium_threshold = parse(args, &mut idx, "--medium-threshold")?;
                }
                "--bottleneck-threshold" => {
                    signal.bottleneck_threshold = parse(args, &mut idx, "--bottleneck-threshold")?;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}");
                }
                other => {
                    cameras.push(other.to_string());
                    idx += 1;
                }
            }
        }

        if cameras.is_empty() {
            bail!("Missing camera sources. Provide --video <path> at least once.");
        }
        let model_path =
            model_path.ok_or_else(|| anyhow!("Missing model path. Provide --model <path>."))?;

        signal
            .validate()
            .context("invalid signal timing configuration")?;

        Ok(Self {
            cameras,
            model_path,
            port,
            width,
            height,
            detector_width,
            detector_height,
            min_confidence,
            jpeg_quality,
            use_cpu,
            verbose,
            seed,
            signal,
        })
    }
}

fn take_value(args: &[String], idx: &mut usize, flag: &str) -> Result<String> {
    *idx += 1;
    let value = args
        .get(*idx)
        .ok_or_else(|| anyhow!("{flag} requires a value"))?
        .clone();
    *idx += 1;
    Ok(value)
}

fn parse<T: std::str::FromStr>(args: &[String], idx: &mut usize, flag: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    take_value(args, idx, flag)?
        .parse::<T>()
        .with_context(|| format!("{flag} has an invalid value"))
}

fn parse_positive(args: &[String], idx: &mut usize, flag: &str) -> Result<i32> {
    let value: i32 = parse(args, idx, flag)?;
    if value <= 0 {
        bail!("{flag} must be a positive integer");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        let mut all = vec!["traffic-app".to_string(), "serve".to_string()];
        all.extend(list.iter().map(|s| s.to_string()));
        all
    }

    #[test]
    fn parses_multiple_cameras_and_overrides() {
        let config = AppConfig::from_args(&args(&[
            "--video",
            "a.mp4",
            "--video",
            "b.mp4",
            "--model",
            "yolo.pt",
            "--port",
            "9000",
            "--min-green",
            "15",
            "--base-green",
            "25",
            "--seed",
            "7",
        ]))
        .unwrap();
        assert_eq!(config.cameras, vec!["a.mp4", "b.mp4"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.signal.min_green, 15);
        assert_eq!(config.signal.base_green, 25);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn accepts_positional_sources() {
        let config =
            AppConfig::from_args(&args(&["a.mp4", "b.mp4", "--model", "yolo.pt"])).unwrap();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.detector_width, 640);
        assert_eq!(config.detector_height, 360);
    }

    #[test]
    fn rejects_missing_model_and_bad_signal_bounds() {
        assert!(AppConfig::from_args(&args(&["a.mp4"])).is_err());
        let result = AppConfig::from_args(&args(&[
            "a.mp4",
            "--model",
            "yolo.pt",
            "--base-green",
            "90",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(AppConfig::from_args(&args(&["a.mp4", "--model", "m.pt", "--nope"])).is_err());
    }
}
