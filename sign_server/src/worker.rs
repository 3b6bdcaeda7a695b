//! Classification worker.
//!
//! Connection tasks push [`ClassifyJob`]s into a bounded `thingbuf` channel whose slots are
//! reused between jobs. The worker drains it, runs the classifier and answers through the reply
//! sender of the originating connection.
use std::sync::Arc;

use anyhow::{bail, Result};
use common::protocol::PredictionMsg;
use tokio::sync::mpsc;

use crate::{board::PredictionBoard, classifier::Classifier, meter::{Event, METER}};

/// Landmarks of one frame waiting for classification.
#[derive(Clone, Debug, Default)]
pub struct ClassifyJob {
    pub channel: String,
    pub seq: u64,
    pub features: Vec<f32>,
    pub reply: Option<mpsc::Sender<PredictionMsg>>,
}

pub type JobSender = thingbuf::mpsc::Sender<ClassifyJob>;
pub type JobReceiver = thingbuf::mpsc::Receiver<ClassifyJob>;

pub fn job_channel(capacity: usize) -> (JobSender, JobReceiver) {
    thingbuf::mpsc::channel(capacity)
}

pub struct ClassifyWorker {
    jobs_rx: JobReceiver,
    classifier: Box<dyn Classifier>,
    board: Arc<PredictionBoard>,
    min_confidence: f32,
}

impl ClassifyWorker {
    pub fn new(
        jobs_rx: JobReceiver,
        classifier: Box<dyn Classifier>,
        board: Arc<PredictionBoard>,
        min_confidence: f32,
    ) -> Self {
        Self {
            jobs_rx,
            classifier,
            board,
            min_confidence,
        }
    }

    pub async fn run(&self) -> Result<()> {
        log::info!(
            "Classification worker started, expecting {} features",
            self.classifier.num_features()
        );

        loop {
            let (prediction, reply) = match self.jobs_rx.recv_ref().await {
                None => bail!("classification job channel closed"),
                Some(mut job) => {
                    let reply = job.reply.take();
                    (self.predict(&job.channel, job.seq, &job.features), reply)
                }
            };

            let prediction = match prediction {
                Ok(prediction) => prediction,
                Err(e) => {
                    log::warn!("Classification failed: {e}");
                    continue;
                }
            };

            METER.tick(Event::Prediction);
            self.board.publish(prediction.clone()).await;

            if let Some(reply) = reply {
                if reply.try_send(prediction).is_err() {
                    log::debug!("Reply dropped - connection closed or congested");
                }
            }
        }
    }

    /// Classify `features` and apply the confidence threshold.
    pub fn predict(&self, channel: &str, seq: u64, features: &[f32]) -> Result<PredictionMsg> {
        let scored = self.classifier.classify(features)?;
        log::debug!(
            "{channel} #{seq}: {} ({:.2})",
            &scored.label,
            scored.confidence
        );

        let label = (scored.confidence >= self.min_confidence).then_some(scored.label);

        Ok(PredictionMsg {
            id: channel.to_owned(),
            seq,
            label,
            confidence: scored.confidence,
        })
    }
}

#[cfg(test)]
mod test {

    use common::landmarks::Template;

    use super::*;
    use crate::classifier::TemplateClassifier;

    fn worker(min_confidence: f32) -> Result<(JobSender, ClassifyWorker, Arc<PredictionBoard>)> {
        let classifier = TemplateClassifier::new(
            vec![
                Template {
                    label: "A".into(),
                    features: vec![0.0, 0.0],
                },
                Template {
                    label: "B".into(),
                    features: vec![5.0, 5.0],
                },
                Template {
                    label: "B".into(),
                    features: vec![6.0, 6.0],
                },
            ],
            2,
        )?;
        let board = Arc::new(PredictionBoard::new());
        let (jobs_tx, jobs_rx) = job_channel(4);
        let worker = ClassifyWorker::new(jobs_rx, Box::new(classifier), board.clone(), min_confidence);

        Ok((jobs_tx, worker, board))
    }

    #[test]
    fn test_low_confidence_has_no_label() -> Result<()> {
        let (_jobs_tx, worker, _board) = worker(0.75)?;

        let confident = worker.predict("simon", 1, &[5.5, 5.5])?;
        assert_eq!(confident.label.as_deref(), Some("B"));

        let unsure = worker.predict("simon", 2, &[2.0, 2.0])?;
        assert_eq!(unsure.label, None);
        assert_eq!(unsure.confidence, 0.5);

        Ok(())
    }

    #[tokio::test]
    async fn test_job_is_answered_and_published() -> Result<()> {
        let (jobs_tx, worker, board) = worker(0.5)?;
        board.open("simon").await;
        tokio::spawn(async move { worker.run().await });

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        {
            let mut job = jobs_tx
                .try_send_ref()
                .map_err(|_| anyhow::anyhow!("job queue full"))?;
            job.channel.push_str("simon");
            job.seq = 42;
            job.features.extend_from_slice(&[5.0, 5.5]);
            job.reply = Some(reply_tx);
        }

        let prediction = reply_rx.recv().await.expect("reply");
        assert_eq!(prediction.seq, 42);
        assert_eq!(prediction.label.as_deref(), Some("B"));
        assert_eq!(board.latest("simon").await, Some(prediction));

        Ok(())
    }
}
