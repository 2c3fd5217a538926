//! Tesseract OCR backend
//!
//! Wraps the `tesseract` command line tool and reads its TSV output, which
//! carries per-word confidences on the 0 - 100 scale used throughout the crate.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{EngineFactory, EngineOutput, ImageSource, OcrEngine, ProgressFn, RecognizedWord};
use super::preprocess::prepare_image;
use crate::config::OcrSettings;
use crate::error::{OcrError, Result};

/// TSV row level for individual words
const WORD_LEVEL: u32 = 5;

/// How often a running tesseract process is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Tesseract CLI engine
pub struct TesseractEngine {
    settings: OcrSettings,
    version: String,
    usable: bool,
}

impl TesseractEngine {
    /// Create an engine, checking that the binary can be executed
    pub fn new(settings: &OcrSettings) -> Result<Self> {
        let version = tesseract_version(settings.binary())?;
        info!("Tesseract {} ready (language: {})", version, settings.language);
        Ok(Self {
            settings: settings.clone(),
            version,
            usable: true,
        })
    }

    /// Factory building a fresh engine per worker
    pub fn factory(settings: OcrSettings) -> EngineFactory {
        Arc::new(move || Ok(Box::new(TesseractEngine::new(&settings)?) as Box<dyn OcrEngine>))
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(
        &mut self,
        image: &ImageSource,
        cancel: &CancellationToken,
        progress: &mut ProgressFn<'_>,
    ) -> Result<EngineOutput> {
        let start = Instant::now();
        progress("loading tesseract core", 0.0);

        let prepared = prepare_image(image.bytes(), &self.settings.preprocessing);
        let mut input = tempfile::Builder::new()
            .prefix("quest-ocr-")
            .suffix(&format!(".{}", prepared.extension))
            .tempfile()?;
        input.write_all(&prepared.data)?;
        input.flush()?;

        progress("initializing api", 0.1);

        let mut cmd = Command::new(self.settings.binary());
        cmd.arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.settings.page_segmentation_mode.to_string())
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running {:?}", cmd);
        progress("recognizing text", 0.2);

        let child = cmd.spawn().map_err(|e| {
            // The binary vanished or lost permissions since construction
            self.usable = false;
            OcrError::EngineUnavailable(format!("failed to run tesseract: {}", e))
        })?;
        let output = wait_for_child(child, cancel)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Tesseract exited with {}: {}", output.status, stderr.trim());
            return Err(OcrError::EngineUnavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        progress("recognizing text", 0.9);
        let result = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        progress("recognizing text", 1.0);

        info!(
            "Tesseract recognized {} words from {} in {:?}",
            result.words.len(),
            image.label(),
            start.elapsed()
        );

        Ok(result)
    }

    fn is_usable(&self) -> bool {
        self.usable
    }
}

/// Collected output of a finished tesseract process
#[derive(Debug)]
struct ChildOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Wait for `child` to exit, killing it if `cancel` fires first.
///
/// The pipes are drained on their own threads so a large TSV cannot stall
/// the process on a full pipe while we poll.
fn wait_for_child(mut child: Child, cancel: &CancellationToken) -> Result<ChildOutput> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("Cancelling tesseract (pid {})", child.id());
            if let Err(e) = child.kill() {
                debug!("Failed to kill tesseract: {}", e);
            }
            let _ = child.wait();
            return Err(OcrError::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    Ok(ChildOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!("Failed to read tesseract output: {}", e);
            }
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// Parse `tesseract ... tsv` output into words and line-structured text.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text
pub fn parse_tsv(tsv: &str) -> EngineOutput {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut current_line: Option<(u32, u32, u32, u32)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }

        let level: u32 = cols[0].parse().unwrap_or(0);
        if level != WORD_LEVEL {
            continue;
        }

        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let key: (u32, u32, u32, u32) = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        match current_line {
            Some(prev) if prev == key => text.push(' '),
            Some(prev) => {
                // blank line between blocks, newline between lines
                text.push('\n');
                if prev.1 != key.1 || prev.0 != key.0 {
                    text.push('\n');
                }
            }
            None => {}
        }
        current_line = Some(key);
        text.push_str(word);

        words.push(RecognizedWord::new(word, conf.min(100.0)));
    }

    EngineOutput { text, words }
}

/// Get the Tesseract version string, failing if the binary cannot run
pub fn tesseract_version(binary: &str) -> Result<String> {
    let output = Command::new(binary)
        .arg("--version")
        .output()
        .map_err(|e| OcrError::EngineUnavailable(format!("cannot execute {}: {}", binary, e)))?;

    if !output.status.success() {
        return Err(OcrError::EngineUnavailable(format!(
            "{} --version exited with {}",
            binary, output.status
        )));
    }

    // Older releases print the banner on stderr
    let banner = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };

    Ok(banner
        .lines()
        .next()
        .map(|l| l.trim_start_matches("tesseract").trim().to_string())
        .unwrap_or_else(|| "unknown".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
2\t1\t1\t0\t0\t0\t10\t10\t300\t40\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t91.5\tSharing
5\t1\t1\t1\t1\t2\t95\t10\t80\t20\t88.25\t@DevFest
5\t1\t1\t1\t2\t1\t10\t35\t80\t20\t76\t#GDG
5\t1\t1\t1\t2\t2\t95\t35\t80\t20\t-1\t
5\t1\t2\t1\t1\t1\t10\t80\t80\t20\t64\tthanks!
";

    #[test]
    fn test_parse_words() {
        let out = parse_tsv(SAMPLE);
        let texts: Vec<&str> = out.words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Sharing", "@DevFest", "#GDG", "thanks!"]);
        assert!((out.words[1].confidence - 88.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_text_layout() {
        let out = parse_tsv(SAMPLE);
        assert_eq!(out.text, "Sharing @DevFest\n#GDG\n\nthanks!");
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(parse_tsv("").words.is_empty());
        let out = parse_tsv("header\nnot\ta\tvalid\trow\n");
        assert!(out.words.is_empty());
        assert!(out.text.is_empty());
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let settings = OcrSettings {
            tesseract_path: Some("/nonexistent/bin/tesseract-quest".to_string()),
            ..Default::default()
        };
        let err = TesseractEngine::new(&settings).err().unwrap();
        assert!(err.is_engine_failure());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_for_child_collects_output() {
        let child = Command::new("sh")
            .args(["-c", "printf 'level\\tconf\\n'; printf oops >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let output = wait_for_child(child, &CancellationToken::new()).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"level\tconf\n");
        assert_eq!(output.stderr, b"oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_for_child_kills_on_cancel() {
        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = Instant::now();
        let err = wait_for_child(child, &cancel).unwrap_err();
        assert!(matches!(err, OcrError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
