//! Wire a [`CycleController`] from an [`AgentConfig`].

use std::sync::Arc;

use anima_common::{Clock, SystemClock};
use anima_llm::LlmGenerativeService;
use anima_memory::AgentMemory;
use anima_platform::build_platform_client;
use anyhow::Context;
use tracing::info;

use crate::config::AgentConfig;
use crate::cycle::{Collaborators, CycleController};
use crate::metrics::JsonlMetricsSink;
use crate::observation::SimulationLogger;
use crate::persona::Persona;

/// Load the persona and build every production collaborator.
pub async fn build_controller(config: &AgentConfig) -> anyhow::Result<CycleController> {
    let settings = &config.agent;
    let persona = Persona::from_file(&settings.persona_file)
        .with_context(|| format!("loading persona {}", settings.persona_file.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let generative = LlmGenerativeService::from_config(&config.llm).context("building LLM client")?;
    let platform = build_platform_client(&config.platform).context("building platform client")?;
    let memory = AgentMemory::from_config(&config.memory, &settings.agent_id, clock.clone())
        .await
        .context("building memory store")?;

    info!(
        agent = %settings.agent_id,
        persona = %persona.name(),
        llm = %config.llm.provider,
        platform = %config.platform.provider,
        memory = %config.memory.backend,
        "Agent collaborators ready"
    );

    let collaborators = Collaborators {
        platform,
        generative: Arc::new(generative),
        memory: Arc::new(memory),
        metrics: Arc::new(JsonlMetricsSink::new(&settings.metrics_path)),
        clock: clock.clone(),
    };
    let mut controller = CycleController::new(settings.clone(), persona, collaborators)
        .with_publish_retry(config.publish_retry.clone());
    if let Some(dir) = &settings.simulation_dir {
        controller = controller.with_simulation_logger(SimulationLogger::new(dir, clock));
    }
    Ok(controller)
}
