//! Re-planning and pod admission commands

use anyhow::Result;

use crate::client::{AdmissionOutcome, AdmissionRequest, ApiClient};
use crate::output::{format_ids, print_info, print_json, print_success, OutputFormat};

/// Ask the agent to re-plan soon
pub async fn request_adjust(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.adjust().await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.queued {
                print_success("Adjustment queued");
            } else {
                print_info("An adjustment is already pending");
            }
        }
    }

    Ok(())
}

/// Forward an admission request to the agent
pub async fn admit_pod(
    client: &ApiClient,
    request: AdmissionRequest,
    format: OutputFormat,
) -> Result<()> {
    let outcome = client.admit(&request).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => match outcome {
            AdmissionOutcome::Skipped => {
                print_info(&format!("Sidecar of pod {} skipped", request.pod_uid))
            }
            AdmissionOutcome::Admitted => {
                print_success(&format!("Pod {} admitted", request.pod_uid))
            }
            AdmissionOutcome::Preempted {
                newly_preempted,
                adjust_queued,
            } => {
                print_success(&format!(
                    "Pod {} admitted, newly preempted nodes: {}",
                    request.pod_uid,
                    format_ids(&newly_preempted)
                ));
                if adjust_queued {
                    print_info("Re-plan queued");
                }
            }
        },
    }

    Ok(())
}
