// src/core/system_prompt.rs — System prompt rendered from the live tool registry
//
// Re-rendered every turn, so the tools the model reads about are always the
// tools the interceptor will accept.

use minijinja::{context, Environment};

use super::types::{ContextKind, ContextMetadata};
use crate::infra::errors::RlmError;
use crate::sandbox::engine::ALLOWED_MODULES;
use crate::tools::ToolSpec;

const SYSTEM_TEMPLATE: &str = r#"You are exploring a {{ kind }} that is too large to read directly. You cannot see it; you can only inspect it by writing Rhai code that runs in an isolated sandbox.

## Context
{{ description }}
The full text is bound to the variable `context`.

## How to work
Reply with one or more fenced code blocks tagged `rhai`:

```rhai
let n = context.len();
print(n);
```

Each block runs in a fresh worker process. Variables you define persist to later blocks; functions do not. Output from `print` is returned to you, truncated to {{ max_print_chars }} chars, so print summaries rather than raw text. Each block is killed after {{ code_timeout_secs }}s.
Importable modules: {% for m in modules %}`{{ m }}`{% if not loop.last %}, {% endif %}{% endfor %}. Nothing else can be imported.

## Tools
{% for tool in tools -%}
- `{{ tool.signature }}` -> {{ tool.returns }}. {{ tool.description }}
{% endfor %}
Tool calls run on the host before your block is sent to the sandbox. Every call must be assigned to a variable at the top level of a block, with literal arguments only{% if tools %}:

```rhai
let result = {{ tools[0].example }};
```
{% else %}.
{% endif %}
Bare calls, calls nested inside other expressions and calls with variable arguments are rejected and the block does not run.

## Finishing
When you know the answer, either call `FINAL(answer)`, which stops the block immediately, or assign `FINAL_ANSWER = answer;`.
Budget: ${{ max_budget_usd }} for the whole session, sub-query depth {{ max_depth }}. Spent so far: {{ budget_status }}.
"#;

/// Sent when a reply contained no runnable block.
pub const NO_CODE_STEERING: &str = "Your reply contained no runnable code block. Write Rhai code \
in a fenced block tagged `rhai` to inspect the context, or finish with `FINAL(answer)` \
(or `FINAL_ANSWER = answer;`) inside a code block.";

/// Everything the prompt needs besides the tool list.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub context: &'a ContextMetadata,
    pub max_budget_usd: f64,
    pub max_depth: u32,
    pub code_timeout_secs: u64,
    pub max_print_chars: usize,
    pub budget_status: String,
}

pub fn render_system_prompt(
    inputs: &PromptInputs<'_>,
    tools: &[ToolSpec],
) -> Result<String, RlmError> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .map_err(|e| RlmError::Other(e.into()))?;
    let tmpl = env
        .get_template("system")
        .map_err(|e| RlmError::Other(e.into()))?;

    let kind = match inputs.context.kind {
        ContextKind::Text => "text document",
        ContextKind::Code => "source file",
    };

    tmpl.render(context! {
        kind => kind,
        description => inputs.context.describe(),
        tools => tools,
        modules => ALLOWED_MODULES,
        max_print_chars => inputs.max_print_chars,
        code_timeout_secs => inputs.code_timeout_secs,
        max_budget_usd => format!("{:.2}", inputs.max_budget_usd),
        max_depth => inputs.max_depth,
        budget_status => &inputs.budget_status,
    })
    .map_err(|e| RlmError::Other(e.into()))
}
