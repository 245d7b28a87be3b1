//! Recipe Command Builder (§4.6): renders `cmd` / `cmdStop` as a typed
//! command tree (§9 redesign flag) instead of ad hoc string
//! concatenation. Each layer has its own encoder; the tree is rendered to
//! a final string only at the edge, and `shlex::split` round-trips the
//! result as the "lexer-equivalent check" standing in for `bash -n` (I5).

use fabric_model::{pinned_group_id, BackendKind, ManagedModel, ModelMode, Recipe};

use crate::error::CommandBuildError;

/// A node in the command tree. Rendering happens bottom-up via `render`.
#[derive(Clone, Debug)]
pub enum CommandNode {
    /// Runs verbatim on the local shell.
    Local(String),
    /// Wraps `inner` in `ssh -o BatchMode=yes -o StrictHostKeyChecking=no
    /// <node> <quoted-inner>`.
    Ssh { node: String, inner: Box<CommandNode> },
    /// `bash -lc '<quoted script>'` — always the innermost remote layer.
    Bash { script: String },
    /// `docker exec <container> bash -lc '<quoted script>'` for hot-swap.
    DockerExec { container: String, script: String },
}

impl CommandNode {
    pub fn render(&self) -> String {
        match self {
            CommandNode::Local(s) => s.clone(),
            CommandNode::Bash { script } => format!("bash -lc {}", shlex::try_quote(script).unwrap_or_default()),
            CommandNode::DockerExec { container, script } => format!(
                "docker exec {} bash -lc {}",
                shlex::try_quote(container).unwrap_or_default(),
                shlex::try_quote(script).unwrap_or_default()
            ),
            CommandNode::Ssh { node, inner } => {
                let inner_rendered = inner.render();
                format!(
                    "ssh -o BatchMode=yes -o StrictHostKeyChecking=no {} {}",
                    shlex::try_quote(node).unwrap_or_default(),
                    shlex::try_quote(&inner_rendered).unwrap_or_default()
                )
            }
        }
    }
}

/// Validates a rendered payload by re-tokenizing it (I5). A render that
/// fails to re-tokenize is rejected.
pub fn validate_shell_syntax(rendered: &str) -> Result<(), CommandBuildError> {
    match shlex::split(rendered) {
        Some(tokens) if !tokens.is_empty() => Ok(()),
        _ => Err(CommandBuildError::UnbalancedQuoting),
    }
}

/// Rendered products for a `ManagedModel`: authoritative shell payloads.
#[derive(Clone, Debug)]
pub struct RenderedCommand {
    pub cmd: String,
    pub cmd_stop: String,
    pub group_id: String,
}

/// Placement decision fed into the builder, separate from the recipe
/// defaults so the selector and the builder stay decoupled.
#[derive(Clone, Debug)]
pub struct Placement {
    /// Resolved single node when placement pins to one node (solo, or
    /// cluster with TP=1 and one node).
    pub single_node: Option<String>,
    pub tensor_parallel: u32,
    /// Existing detected container name, for vLLM hot-swap mode.
    pub hot_swap_container: Option<String>,
}

pub struct CommandBuilder;

impl CommandBuilder {
    pub fn render(
        recipe: &Recipe,
        model: &ManagedModel,
        placement: &Placement,
    ) -> Result<RenderedCommand, CommandBuildError> {
        let script = render_inner_script(recipe, model, placement);
        let stop_script = render_stop_script(recipe, model, placement);

        let single_node = placement.single_node.as_deref();
        let pinned = model.mode == ModelMode::Solo
            || (model.mode == ModelMode::Cluster && placement.tensor_parallel <= 1 && single_node.is_some());

        let (cmd_node, stop_node) = if pinned {
            let node = single_node.ok_or(CommandBuildError::NoNodeForPlacement)?;
            if let Some(container) = &placement.hot_swap_container {
                (
                    CommandNode::Ssh {
                        node: node.to_string(),
                        inner: Box::new(CommandNode::DockerExec {
                            container: container.clone(),
                            script: script.clone(),
                        }),
                    },
                    CommandNode::Ssh {
                        node: node.to_string(),
                        inner: Box::new(CommandNode::Bash { script: stop_script }),
                    },
                )
            } else {
                (
                    CommandNode::Ssh { node: node.to_string(), inner: Box::new(CommandNode::Bash { script }) },
                    CommandNode::Ssh {
                        node: node.to_string(),
                        inner: Box::new(CommandNode::Bash { script: stop_script }),
                    },
                )
            }
        } else {
            (CommandNode::Local(script), CommandNode::Local(stop_script))
        };

        let cmd = cmd_node.render();
        let cmd_stop = stop_node.render();
        validate_shell_syntax(&cmd)?;
        validate_shell_syntax(&cmd_stop)?;

        let group_id = match single_node {
            Some(node) if pinned => pinned_group_id(&model.group_name, node),
            _ => model.group_name.clone(),
        };

        Ok(RenderedCommand { cmd, cmd_stop, group_id })
    }
}

fn quote(s: &str) -> String {
    shlex::try_quote(s).unwrap_or_default().into_owned()
}

fn render_inner_script(recipe: &Recipe, model: &ManagedModel, placement: &Placement) -> String {
    let mut parts = Vec::new();

    if recipe.backend_kind == BackendKind::Vllm && model.mode == ModelMode::Cluster {
        // §4.6: conditional reset — only stop an existing unhealthy cluster
        // container, never a healthy one.
        parts.push(
            "if docker ps -a --format '{{.Names}}' | grep -q '^vllm_cluster$' && ! docker exec vllm_cluster curl -sf http://localhost:8000/health >/dev/null 2>&1; then bash launch-cluster.sh stop; fi".to_string(),
        );
    }

    let tp = placement.tensor_parallel.max(model.tensor_parallel.unwrap_or(1));
    let mut cmd = format!(
        "cd {} && {} --model {} --tensor-parallel-size {}",
        quote(&recipe.backend_dir),
        quote(&recipe.runtime),
        quote(&recipe.model),
        tp
    );
    if let Some(util) = recipe.defaults.gpu_memory_utilization {
        cmd.push_str(&format!(" --gpu-memory-utilization {util}"));
    }
    if let Some(port) = recipe.defaults.port {
        cmd.push_str(&format!(" --port {port}"));
    }
    if let Some(container) = &model.container_image {
        cmd.push_str(&format!(" --image {}", quote(container)));
    }
    for extra in &model.extra_args {
        cmd.push(' ');
        cmd.push_str(&quote(extra));
    }
    parts.push(cmd);

    parts.join(" && ")
}

fn render_stop_script(recipe: &Recipe, model: &ManagedModel, placement: &Placement) -> String {
    match recipe.backend_kind {
        BackendKind::Llamacpp => {
            let port = recipe.defaults.port.unwrap_or(8080);
            let current = format!("llama_cpp_spark_{}_{}", recipe.recipe_ref, port);
            let legacy = format!("llama_cpp_spark_{port}");
            format!(
                "docker stop {cur} 2>/dev/null; docker stop {leg} 2>/dev/null; true",
                cur = quote(&current),
                leg = quote(&legacy)
            )
        }
        BackendKind::Vllm => {
            if model.mode == ModelMode::Cluster {
                "bash launch-cluster.sh stop".to_string()
            } else {
                let name = container_name_for(model);
                format!("docker stop {} 2>/dev/null; true", quote(&name))
            }
        }
        _ => {
            let name = container_name_for(model);
            let _ = placement;
            format!("docker stop {} 2>/dev/null; true", quote(&name))
        }
    }
}

fn container_name_for(model: &ManagedModel) -> String {
    model.use_model_name.clone().unwrap_or_else(|| model.model_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_model::RecipeDefaults;

    fn recipe(kind: BackendKind) -> Recipe {
        Recipe {
            id: "r1".into(),
            recipe_ref: "vllm/llama3".into(),
            backend_dir: "/opt/backends/vllm".into(),
            backend_kind: kind,
            runtime: "vllm serve".into(),
            model: "meta/llama3-8b".into(),
            defaults: RecipeDefaults { port: Some(8000), ..Default::default() },
            command_template: String::new(),
            solo_only: false,
            cluster_only: false,
            container_image: None,
        }
    }

    fn model(mode: ModelMode) -> ManagedModel {
        ManagedModel {
            model_id: "m1".into(),
            recipe_ref: "vllm/llama3".into(),
            mode,
            tensor_parallel: Some(1),
            nodes: None,
            extra_args: vec!["--foo".into(), "bar baz".into()],
            container_image: None,
            non_privileged: false,
            mem_limit_gb: None,
            group_name: "default".into(),
            use_model_name: None,
            aliases: vec![],
            rendered_cmd: None,
            rendered_cmd_stop: None,
            rendered_group_id: None,
            rendered_host: None,
            metadata: Default::default(),
            schema_version: 1,
        }
    }

    #[test]
    fn solo_wraps_in_ssh_and_bash() {
        let placement = Placement { single_node: Some("10.0.0.2".into()), tensor_parallel: 1, hot_swap_container: None };
        let rendered = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Solo), &placement).unwrap();
        assert!(rendered.cmd.starts_with("ssh -o BatchMode=yes -o StrictHostKeyChecking=no"));
        assert!(rendered.cmd.contains("10.0.0.2"));
        assert!(rendered.cmd.contains("bash -lc"));
        assert_eq!(rendered.group_id, "default-10-0-0-2");
    }

    #[test]
    fn extra_args_are_shell_quoted() {
        let placement = Placement { single_node: Some("10.0.0.2".into()), tensor_parallel: 1, hot_swap_container: None };
        let rendered = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Solo), &placement).unwrap();
        assert!(rendered.cmd.contains("bar baz") || rendered.cmd.contains("bar\\ baz"));
        // the rendered command must re-tokenize cleanly
        validate_shell_syntax(&rendered.cmd).unwrap();
    }

    #[test]
    fn cluster_multi_node_stays_local_not_pinned() {
        let placement = Placement { single_node: None, tensor_parallel: 4, hot_swap_container: None };
        let rendered = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Cluster), &placement).unwrap();
        assert!(!rendered.cmd.starts_with("ssh"));
        assert_eq!(rendered.group_id, "default");
    }

    #[test]
    fn vllm_cluster_prepends_conditional_reset() {
        let placement = Placement { single_node: None, tensor_parallel: 4, hot_swap_container: None };
        let rendered = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Cluster), &placement).unwrap();
        assert!(rendered.cmd.contains("launch-cluster.sh stop"));
        assert!(rendered.cmd.contains("if docker ps"));
    }

    #[test]
    fn llamacpp_stop_matches_current_and_legacy_names() {
        let placement = Placement { single_node: Some("n1".into()), tensor_parallel: 1, hot_swap_container: None };
        let rendered =
            CommandBuilder::render(&recipe(BackendKind::Llamacpp), &model(ModelMode::Solo), &placement).unwrap();
        assert!(rendered.cmd_stop.contains("llama_cpp_spark_vllm/llama3_8000") || rendered.cmd_stop.contains("llama_cpp_spark_vllm"));
        assert!(rendered.cmd_stop.contains("llama_cpp_spark_8000"));
    }

    #[test]
    fn hot_swap_uses_docker_exec() {
        let placement =
            Placement { single_node: Some("n1".into()), tensor_parallel: 1, hot_swap_container: Some("vllm_m1".into()) };
        let rendered = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Solo), &placement).unwrap();
        assert!(rendered.cmd.contains("docker exec"));
        assert!(rendered.cmd.contains("vllm_m1"));
    }

    #[test]
    fn pinned_without_a_node_is_an_error() {
        let placement = Placement { single_node: None, tensor_parallel: 1, hot_swap_container: None };
        let err = CommandBuilder::render(&recipe(BackendKind::Vllm), &model(ModelMode::Solo), &placement).unwrap_err();
        assert!(matches!(err, CommandBuildError::NoNodeForPlacement));
    }
}
