//! Recording labeled landmark templates.
//!
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use common::landmarks::{flatten, normalize_landmarks, Landmark, Template};

/// Appends normalized landmarks as JSON Lines templates.
pub struct TemplateRecorder {
    label: String,
    writer: BufWriter<File>,
    count: usize,
}

impl TemplateRecorder {
    pub fn create(path: impl AsRef<Path>, label: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("failed to open {:?} for recording", path.as_ref()))?;
        log::info!("Recording templates for {:?} to {:?}", label, path.as_ref());

        Ok(Self {
            label: label.to_owned(),
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    pub fn record(&mut self, landmarks: &[Landmark]) -> Result<()> {
        let template = Template {
            label: self.label.clone(),
            features: flatten(&normalize_landmarks(landmarks)),
        };
        serde_json::to_writer(&mut self.writer, &template)?;
        self.writer.write_all(b"\n")?;
        self.count += 1;

        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for TemplateRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("Failed to flush recorded templates: {e}");
        }
    }
}

#[cfg(test)]
mod test {

    use std::io::{BufRead, BufReader};

    use super::*;

    #[test]
    fn test_records_are_appended() -> Result<()> {
        let path = std::env::temp_dir().join(format!(
            "hand_sender_recorder_{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let landmarks = [Landmark::new(50.0, 60.0, 1.0), Landmark::new(70.0, 65.0, 2.0)];
        {
            let mut recorder = TemplateRecorder::create(&path, "A")?;
            recorder.record(&landmarks)?;
            assert_eq!(recorder.count(), 1);
        }
        {
            let mut recorder = TemplateRecorder::create(&path, "B")?;
            recorder.record(&landmarks)?;
            recorder.flush()?;
        }

        let templates: Vec<Template> = BufReader::new(File::open(&path)?)
            .lines()
            .map(|line| Ok(serde_json::from_str(&line?)?))
            .collect::<Result<_>>()?;
        std::fs::remove_file(&path)?;

        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].label, "A");
        assert_eq!(templates[1].label, "B");
        assert_eq!(templates[1].features, vec![0.0, 0.0, 20.0, 5.0]);

        Ok(())
    }
}
