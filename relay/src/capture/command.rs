use frame_relay_common::config::CaptureConfig;
use tokio::process::Command;
use tracing::{debug, warn};

/// A fully composed capture invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Map the capture settings to an ffmpeg-style argument list. Frames are
    /// always encoded as MJPEG so each upload is a complete JPEG.
    pub fn from_config(config: &CaptureConfig, default_output: &str) -> Self {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            config.log_level.clone(),
        ];

        if let Some(format) = non_empty(config.input_format.as_deref()) {
            push(&mut args, "-f", format);
        }
        if let Some(fps) = config.fps {
            push(&mut args, "-framerate", &fps.to_string());
        }
        if let Some(resolution) = non_empty(config.resolution.as_deref()) {
            push(&mut args, "-video_size", resolution);
        }
        push(&mut args, "-i", &config.input);

        let filters: Vec<&str> = config
            .filters
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        if !filters.is_empty() {
            push(&mut args, "-vf", &filters.join(","));
        }
        if let Some(pix_fmt) = non_empty(config.pixel_format.as_deref()) {
            push(&mut args, "-pix_fmt", pix_fmt);
        }

        push(&mut args, "-c:v", "mjpeg");
        if let Some(bitrate) = non_empty(config.bitrate.as_deref()) {
            push(&mut args, "-b:v", bitrate);
        }
        if let Some(fps) = config.fps {
            push(&mut args, "-r", &fps.to_string());
        }

        push(&mut args, "-f", &config.format);
        if config.format == "image2" {
            // Reuse the one output name for every frame instead of numbering.
            push(&mut args, "-update", "1");
        }
        args.push(
            non_empty(config.output.as_deref())
                .unwrap_or(default_output)
                .to_string(),
        );

        Self {
            program: config.program.clone(),
            args,
        }
    }

    /// Render for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn push(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Check whether the capture program can be executed. Logs a warning if not;
/// the supervisor keeps retrying regardless.
pub async fn check_program_available(program: &str) {
    match Command::new(program).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!(program, "capture program is available");
        }
        Ok(out) => {
            warn!(program, status = %out.status, "capture program returned non-zero for -version; capture may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                program,
                "capture program not found; the supervisor will keep restarting it \
                 every restart_delay_ms until it appears"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF_URL: &str = "http://127.0.0.1:8080/mjpeg";

    #[test]
    fn defaults_produce_minimal_invocation() {
        let cmd = CaptureCommand::from_config(&CaptureConfig::default(), SELF_URL);
        assert_eq!(cmd.program, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec![
                "-hide_banner", "-loglevel", "error", "-f", "v4l2", "-i", "/dev/video0", "-c:v",
                "mjpeg", "-f", "image2", "-update", "1", SELF_URL,
            ]
        );
    }

    #[test]
    fn every_option_lands_in_order() {
        let config = CaptureConfig {
            program: "/usr/local/bin/ffmpeg".into(),
            input: "rtsp://cam/stream".into(),
            input_format: Some("rtsp".into()),
            fps: Some(15),
            resolution: Some("1280x720".into()),
            filters: vec!["hflip".into(), " ".into(), "scale=640:-1".into()],
            pixel_format: Some("yuvj420p".into()),
            bitrate: Some("2M".into()),
            format: "mpjpeg".into(),
            output: Some("http://relay:9000/mjpeg".into()),
            restart_delay_ms: 500,
            log_level: "warning".into(),
        };
        let cmd = CaptureCommand::from_config(&config, SELF_URL);
        assert_eq!(
            cmd.display(),
            "/usr/local/bin/ffmpeg -hide_banner -loglevel warning -f rtsp -framerate 15 \
             -video_size 1280x720 -i rtsp://cam/stream -vf hflip,scale=640:-1 \
             -pix_fmt yuvj420p -c:v mjpeg -b:v 2M -r 15 -f mpjpeg http://relay:9000/mjpeg"
        );
    }

    #[test]
    fn blank_optional_values_are_omitted() {
        let config = CaptureConfig {
            input_format: Some("".into()),
            resolution: Some("  ".into()),
            output: Some("".into()),
            ..CaptureConfig::default()
        };
        let cmd = CaptureCommand::from_config(&config, SELF_URL);
        assert!(!cmd.args.iter().any(|a| a == "-video_size"));
        assert_eq!(cmd.args.iter().filter(|a| *a == "-f").count(), 1);
        assert_eq!(cmd.args.last().map(String::as_str), Some(SELF_URL));
    }
}
