//! Sensors module.
//!
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rscam::{Camera, Config, Frame};

pub type CaptureFn = Box<dyn Fn() -> Option<Frame> + Send + Sync>;

/// Webcam settings. Unset values are resolved to the highest the device supports.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)` seconds, e.g. `(1, 30)` for 30 fps.
    pub interval: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: None,
            interval: None,
        }
    }
}

/// Get a capture function to a video device on a Linux machine.
pub fn get_capture_fn(config: &CameraConfig) -> Result<CaptureFn> {
    let mut cam = Camera::new(&config.device)
        .with_context(|| format!("failed to open camera {}", &config.device))?;
    log_supported_formats(&cam, &config.format);
    let format = config.format.as_bytes();

    let resolution = match config.resolution {
        Some(resolution) => resolution,
        None => get_max_resolution(&cam, format)?,
    };

    let interval = match config.interval {
        Some(interval) => interval,
        None => get_min_interval(&cam, format, resolution)?,
    };

    log::info!(
        "Using camera {} at {}x{}, interval {}/{}s",
        &config.device,
        resolution.0,
        resolution.1,
        interval.0,
        interval.1
    );

    cam.start(&Config {
        interval,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || cam.capture().ok();
    Ok(Box::new(callback))
}

/// Decode an MJPG frame.
pub fn decode_frame(data: &[u8]) -> Result<RgbImage> {
    turbojpeg::decompress_image(data).context("failed to decompress frame")
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| anyhow!("no resolution found"))
}

/// Get the shortest frame interval, i.e. the highest frame rate, for format and resolution.
fn get_min_interval(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .into_iter()
            .filter(|(_, denominator)| *denominator > 0)
            .min_by(|a, b| interval_secs(*a).total_cmp(&interval_secs(*b))),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| anyhow!("no frame interval found"))
}

fn interval_secs((numerator, denominator): (u32, u32)) -> f32 {
    numerator as f32 / denominator as f32
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_interval_secs() {
        assert!(interval_secs((1, 30)) < interval_secs((1, 15)));
        assert_eq!(interval_secs((2, 4)), 0.5);
    }

    #[test]
    fn test_decode_frame_rejects_garbage() {
        assert!(decode_frame(b"definitely not a jpeg").is_err());
    }

    #[test]
    fn get_cam_info_if_available() -> Result<()> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";

                let resolutions = cam.resolutions(format)?;
                println!("Supported resolutions: {resolutions:?}");

                let selected_resolution = get_max_resolution(&cam, format)?;
                let intervals = cam.intervals(format, selected_resolution)?;
                println!("Supported frame intervals: {intervals:?}");
            }
        }

        Ok(())
    }
}
