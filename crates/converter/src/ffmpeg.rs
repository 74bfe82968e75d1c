use std::path::Path;
use crate::config::TARGET_RESOLUTION;

/// Scale down to fit inside the target frame, then pad to exactly the target
/// size with the picture centred (letterbox or pillarbox).
pub fn scale_pad_filter() -> String {
    let (w, h) = (TARGET_RESOLUTION.width, TARGET_RESOLUTION.height);
    format!("scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2")
}

/// Build the fixed ffmpeg argument list for one conversion.
///
/// H.264 ultrafast with a low CRF cap and mono AAC keeps encodes quick and
/// files small; `+faststart` moves the index to the front for streaming.
pub fn build_encode_args(input: &Path, output: &Path) -> Vec<String> {
    let mut args = Vec::new();

    // Input file
    args.push("-i".to_string());
    args.push(input.to_string_lossy().to_string());

    args.push("-vf".to_string());
    args.push(scale_pad_filter());

    // Video
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push("ultrafast".to_string());
    args.push("-crf".to_string());
    args.push("28".to_string());
    args.push("-maxrate".to_string());
    args.push("128k".to_string());
    args.push("-bufsize".to_string());
    args.push("256k".to_string());

    // Audio: mono 22.05 kHz
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push("32k".to_string());
    args.push("-ar".to_string());
    args.push("22050".to_string());
    args.push("-ac".to_string());
    args.push("1".to_string());

    args.push("-movflags".to_string());
    args.push("+faststart".to_string());

    // Overwrite a stale temp file from an interrupted run
    args.push("-y".to_string());

    // Output file
    args.push(output.to_string_lossy().to_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_filter_targets_176x144() {
        assert_eq!(
            scale_pad_filter(),
            "scale=176:144:force_original_aspect_ratio=decrease,pad=176:144:(ow-iw)/2:(oh-ih)/2"
        );
    }

    #[test]
    fn test_encode_args() {
        let args = build_encode_args(Path::new("/v/in.mp4"), Path::new("/v/temp_in.mp4.3gp"));

        assert_eq!(value_after(&args, "-i"), Some("/v/in.mp4"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("ultrafast"));
        assert_eq!(value_after(&args, "-crf"), Some("28"));
        assert_eq!(value_after(&args, "-maxrate"), Some("128k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("256k"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("32k"));
        assert_eq!(value_after(&args, "-ar"), Some("22050"));
        assert_eq!(value_after(&args, "-ac"), Some("1"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert!(args.contains(&"-y".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/v/temp_in.mp4.3gp"));
    }
}
