//! The child side of the process pool.

use super::protocol::{decode, encode, WorkerReply, WorkerRequest};
use crate::errors::{ConductorError, ConfigurationError};
use crate::pipeline::build_transforms;
use crate::registry::StageRegistry;
use crate::runner::invoke_transform;
use crate::stages::Transform;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

async fn send<W>(writer: &mut W, reply: &WorkerReply) -> Result<(), ConductorError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encode(reply)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Serves protocol requests read from `reader` until `Shutdown` or end of
/// input, answering on `writer`.
///
/// Nothing but protocol lines is ever written to `writer`; logging must go
/// elsewhere.
///
/// # Errors
///
/// Returns an error if the pipeline cannot be built from the `Init` request,
/// if a request cannot be decoded or on IO failure.
pub async fn serve<R, W>(registry: &StageRegistry, reader: R, mut writer: W) -> Result<(), ConductorError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let pid = std::process::id();

    let Some(first) = lines.next_line().await? else {
        debug!(pid, "Worker input closed before init");
        return Ok(());
    };

    let transforms: Vec<Arc<dyn Transform>> = match decode::<WorkerRequest>(&first)? {
        WorkerRequest::Init { definition } => match build_transforms(&definition, registry) {
            Ok(transforms) => transforms,
            Err(err) => {
                send(&mut writer, &WorkerReply::InitFailed { message: err.to_string() }).await?;
                return Err(err.into());
            }
        },
        other => {
            let err = ConfigurationError::new(format!("Worker expected init, got {other:?}"));
            send(&mut writer, &WorkerReply::InitFailed { message: err.to_string() }).await?;
            return Err(err.into());
        }
    };

    send(&mut writer, &WorkerReply::Ready { pid }).await?;
    debug!(pid, transforms = transforms.len(), "Worker ready");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match decode::<WorkerRequest>(&line)? {
            WorkerRequest::Apply { stage_index, item } => {
                let reply = match transforms.get(stage_index) {
                    Some(transform) => match invoke_transform(transform.as_ref(), item.into_item()).await {
                        Ok(item) => WorkerReply::Applied { item: item.into() },
                        Err(failure) => failure.into(),
                    },
                    None => WorkerReply::Failed {
                        stage: format!("#{stage_index}"),
                        message: format!("no transform at index {stage_index}"),
                        cause: None,
                        item: Some(item),
                    },
                };
                send(&mut writer, &reply).await?;
            }
            WorkerRequest::Shutdown => {
                debug!(pid, "Worker shutting down");
                break;
            }
            WorkerRequest::Init { .. } => {
                warn!(pid, "Ignoring repeated init request");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Item;
    use crate::pipeline::{ElementSpec, PipelineSpec};
    use crate::pool::protocol::WireItem;
    use crate::stages::builtin::{ProbeSource, PROCESSOR_RECORD};
    use crate::stages::Source;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::io::{duplex, BufReader};

    fn definition() -> PipelineSpec {
        PipelineSpec::new(ElementSpec::new("provider", "probe").with_argument("count", json!(1)))
            .with_transform(ElementSpec::new("proc", "probe").with_argument("count", json!(2)))
            .with_transform(
                ElementSpec::new("skip", "filter")
                    .with_argument("pattern", json!("^never$"))
                    .with_argument("invert", json!(false)),
            )
    }

    async fn provider_item() -> Item {
        let mut items = ProbeSource::new("provider", 1).produce();
        items.next().await.unwrap().unwrap()
    }

    async fn exchange(requests: Vec<WorkerRequest>) -> (Result<(), ConductorError>, Vec<WorkerReply>) {
        let registry = StageRegistry::with_builtins();
        let (mut parent, child) = duplex(64 * 1024);
        let (child_read, child_write) = tokio::io::split(child);

        let mut input = String::new();
        for request in &requests {
            input.push_str(&encode(request).unwrap());
        }
        parent.write_all(input.as_bytes()).await.unwrap();
        parent.shutdown().await.unwrap();

        let result = serve(&registry, BufReader::new(child_read), child_write).await;

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut parent, &mut output).await.unwrap();
        let replies = output.lines().map(|line| decode(line).unwrap()).collect();
        (result, replies)
    }

    #[tokio::test]
    async fn test_serve_applies_stages() {
        let item = provider_item().await;
        let (result, replies) = exchange(vec![
            WorkerRequest::Init { definition: definition() },
            WorkerRequest::Apply {
                stage_index: 0,
                item: WireItem::from(item),
            },
            WorkerRequest::Shutdown,
        ])
        .await;

        assert!(result.is_ok());
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], WorkerReply::Ready { .. }));
        let WorkerReply::Applied { item } = &replies[1] else {
            panic!("expected applied reply, got {:?}", replies[1]);
        };
        assert_eq!(item.item.values(PROCESSOR_RECORD).len(), 2);
    }

    #[tokio::test]
    async fn test_serve_reports_bad_stage_index() {
        let (result, replies) = exchange(vec![
            WorkerRequest::Init { definition: definition() },
            WorkerRequest::Apply {
                stage_index: 7,
                item: WireItem::from(Item::new().with_path("p")),
            },
        ])
        .await;

        assert!(result.is_ok());
        let WorkerReply::Failed { stage, item, .. } = &replies[1] else {
            panic!("expected failed reply");
        };
        assert_eq!(stage, "#7");
        assert_eq!(item.as_ref().unwrap().item.path.as_deref(), Some("p"));
    }

    #[tokio::test]
    async fn test_serve_init_failure() {
        let bad = PipelineSpec::new(ElementSpec::new("provider", "probe"))
            .with_transform(ElementSpec::new("proc", "no-such-stage"));
        let (result, replies) = exchange(vec![WorkerRequest::Init { definition: bad }]).await;

        assert!(matches!(result, Err(ConductorError::Configuration(_))));
        assert!(matches!(&replies[0], WorkerReply::InitFailed { message } if message.contains("no-such-stage")));
    }
}
