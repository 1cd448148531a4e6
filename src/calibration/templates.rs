//! Request templates of the model-mediated calibration steps.

/// Diagnosis request. The answer is expected between `<analysis>` tags.
pub const ERROR_ANALYSIS_TEMPLATE_STR: &str = r#"You are an expert in prompt engineering for classification tasks.
An assistant was given the task below and a prompt, and it was evaluated on a labeled dataset.

<task_description>
{task_description}
</task_description>

<prompt>
{prompt}
</prompt>

The prompt reached an accuracy of {accuracy}.

{confusion_matrix}

Here are failure cases. Each one shows the input sample, the assistant's prediction and the ground truth (GT):
<failure_cases>
{failure_cases}
</failure_cases>

Study the failure cases and the confusion matrix. Explain which kinds of inputs the prompt gets wrong and why: missing
definitions, ambiguous label boundaries, misleading wording or output format problems. Finish with concrete
suggestions for improving the prompt.
Write your analysis between <analysis> and </analysis> tags."#;

/// Revision request. The new prompt is expected between `<new_prompt>` tags.
pub const PROMPT_REVISION_TEMPLATE_STR: &str = r#"You are an expert in prompt engineering. Your job is to improve a prompt for the task below.

<task_description>
{task_description}
</task_description>

This is the current prompt:
<original_instruction>
{original_instruction}
</original_instruction>

Earlier prompts with their accuracy, best last:
<prompt_history>
{prompt_history}
</prompt_history>

An analysis of why the current prompt fails:
<error_analysis>
{error_analysis}
</error_analysis>

Some failure cases of the current prompt:
<failure_cases>
{failure_cases}
</failure_cases>

The answer must be exactly one of these labels: {labels}

Write a new prompt that fixes the problems found in the analysis. Keep every variable written in single curly braces
exactly as it appears in the current prompt, since they are filled with data at run time. Make sure the prompt tells
the assistant to answer with one of the labels.
Write the new prompt between <new_prompt> and </new_prompt> tags."#;

#[cfg(test)]
mod test_templates {
    use super::{ERROR_ANALYSIS_TEMPLATE_STR, PROMPT_REVISION_TEMPLATE_STR};
    use crate::prompt::PromptTemplate;

    #[test]
    fn test_placeholders() {
        assert_eq!(PromptTemplate::new(ERROR_ANALYSIS_TEMPLATE_STR).sorted_placeholders(),
                   vec!["accuracy", "confusion_matrix", "failure_cases", "prompt", "task_description"]);
        assert_eq!(PromptTemplate::new(PROMPT_REVISION_TEMPLATE_STR).sorted_placeholders(),
                   vec!["error_analysis", "failure_cases", "labels", "original_instruction", "prompt_history", "task_description"]);
    }
}
