//! AWS Textract implementation of the provider boundary.

use async_trait::async_trait;
use aws_sdk_textract::error::SdkError;
use aws_sdk_textract::operation::detect_document_text::DetectDocumentTextError;
use aws_sdk_textract::primitives::Blob;
use aws_sdk_textract::types::Document;

use super::schema::{self, OcrDocument};
use super::{OcrError, OcrProvider};

pub struct TextractProvider {
    client: aws_sdk_textract::Client,
}

impl TextractProvider {
    pub fn new(client: aws_sdk_textract::Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient credential chain, optionally pinned
    /// to a named profile.
    pub async fn from_env(profile: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        Self::new(aws_sdk_textract::Client::new(&config))
    }
}

#[async_trait]
impl OcrProvider for TextractProvider {
    async fn detect_document_text(&self, document: &[u8]) -> Result<OcrDocument, OcrError> {
        let result = self
            .client
            .detect_document_text()
            .document(Document::builder().bytes(Blob::new(document)).build())
            .send()
            .await;
        match result {
            Ok(output) => {
                let blocks = output.blocks().iter().map(convert_block).collect();
                Ok(OcrDocument::from_blocks(blocks))
            }
            Err(err) => Err(classify_error(err)),
        }
    }
}

fn classify_error(err: SdkError<DetectDocumentTextError>) -> OcrError {
    match err {
        SdkError::ServiceError(ctx) => {
            let service_err = ctx.into_err();
            match &service_err {
                DetectDocumentTextError::InvalidParameterException(_) => {
                    OcrError::InvalidParameter(service_err.to_string())
                }
                DetectDocumentTextError::UnsupportedDocumentException(_)
                | DetectDocumentTextError::BadDocumentException(_)
                | DetectDocumentTextError::DocumentTooLargeException(_) => {
                    OcrError::UnsupportedDocument(service_err.to_string())
                }
                other => OcrError::Transient(other.to_string()),
            }
        }
        SdkError::DispatchFailure(failure) => OcrError::Transport(format!("{failure:?}")),
        SdkError::TimeoutError(_) => OcrError::Transport("request timed out".into()),
        other => OcrError::Transient(other.to_string()),
    }
}

fn convert_block(block: &aws_sdk_textract::types::Block) -> schema::Block {
    schema::Block {
        id: block.id().unwrap_or_default().to_string(),
        block_type: block
            .block_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        relationships: block
            .relationships()
            .iter()
            .map(|rel| schema::Relationship {
                kind: rel
                    .r#type()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                ids: rel.ids().to_vec(),
            })
            .collect(),
        geometry: block.geometry().map(|geometry| schema::Geometry {
            bounding_box: geometry
                .bounding_box()
                .map(|bb| schema::BoundingBox {
                    left: bb.left(),
                    top: bb.top(),
                    width: bb.width(),
                    height: bb.height(),
                })
                .unwrap_or_default(),
            polygon: geometry
                .polygon()
                .iter()
                .map(|p| schema::PolygonPoint { x: p.x(), y: p.y() })
                .collect(),
        }),
        confidence: block.confidence(),
        text: block.text().map(str::to_string),
    }
}
