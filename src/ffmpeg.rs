use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::warn;

/// Thread budget handed to the encoder; the pipeline itself stays
/// single-threaded.
const ENCODER_THREADS: u32 = 4;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let status = cmd.status().await.context("Command execution failed")?;
    if !status.success() {
        return Err(anyhow::anyhow!("Command failed: {:?}", args));
    }

    Ok(())
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Spawn an encoder that consumes raw RGBA frames on stdin and writes a
/// video-only mp4. Muxing the narration happens in a separate pass so the
/// audio stream is carried over untouched.
pub fn spawn_silent_encoder(width: u32, height: u32, fps: u32, out_path: &Path) -> Result<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
        &format!("{width}x{height}"),
        "-r",
        &fps.to_string(),
        "-i",
        "pipe:0",
        "-an",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-preset",
        "veryfast",
        "-crf",
        "22",
        "-threads",
        &ENCODER_THREADS.to_string(),
    ])
    .arg(out_path)
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::piped());

    cmd.spawn()
        .context("failed to spawn ffmpeg (is it installed and on PATH?)")
}

/// Finish a silent-encoder child after its stdin has been dropped; a
/// non-zero exit is fatal for the scene.
pub async fn finish_encoder(child: Child) -> Result<()> {
    let output = child
        .wait_with_output()
        .await
        .context("failed to wait for ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!(
            "ffmpeg encoder exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(())
}

/// Mux a silent video with the original narration file. The video stream is
/// copied, the shortest stream wins, and timestamps are normalized so the
/// copied stream cannot start negative.
pub async fn mux_video_audio(video_in: &Path, audio_in: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video_in.display().to_string(),
        "-i".to_string(),
        audio_in.display().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-shortest".to_string(),
        "-avoid_negative_ts".to_string(),
        "make_zero".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}

pub async fn concat_videos(list_txt: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}

/// Copy a narration WAV, appending `pad_seconds` of trailing silence.
pub async fn pad_audio(in_wav: &Path, pad_seconds: f64, out_wav: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        in_wav.display().to_string(),
        "-af".to_string(),
        format!("apad=pad_dur={:.3}", pad_seconds.max(0.0)),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        out_wav.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_wav.exists())
}

pub async fn concat_audio(list_txt: &Path, out_wav: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        out_wav.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_wav.exists())
}

/// Composite a small looped secondary video into the top-right corner of the
/// final cut.
pub async fn overlay_pip(main_in: &Path, pip_in: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        main_in.display().to_string(),
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        pip_in.display().to_string(),
        "-filter_complex".to_string(),
        "[1:v]scale=iw*0.28:-1[pip];[0:v][pip]overlay=W-w-40:40[v]".to_string(),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-shortest".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ];

    if let Err(err) = run_cmd(&args).await {
        warn!("PIP overlay failed: {err}");
        return Ok(false);
    }

    Ok(out_mp4.exists())
}
