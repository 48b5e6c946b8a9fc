use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{
    constants::{
        INPUT_STAGING_FAILED, PIPE_INPUT_SCRIPT, REDIRECT_INPUT_SCRIPT, STAGE_CHUNK_BYTES,
        STDIN_FILE, TIME_LIMIT_EXCEEDED,
    },
    core::{
        domain::{ExecOutcome, TestCase, TestCaseResult},
        errors::EngineError,
        exec::BoundedRunner,
        pipeline::staging::{shell, stage_file},
        profile::LanguageProfile,
        sandbox::SandboxInstance,
    },
};

/// Runs every test case in order against the same sandbox.
///
/// A failed or timed out test never stops the remaining ones; only transport
/// failures abort the loop.
#[tracing::instrument(skip_all, fields(language = %profile.id, tests = tests.len()))]
pub async fn run_tests(
    runner: &BoundedRunner,
    sandbox: &SandboxInstance,
    profile: &LanguageProfile,
    tests: &[TestCase],
) -> Result<Vec<TestCaseResult>, EngineError> {
    let mut results = Vec::with_capacity(tests.len());

    for (idx, test) in tests.iter().enumerate() {
        let result = match run_test(runner, sandbox, profile, test).await? {
            Some(outcome) => classify(idx + 1, test, &outcome),
            None => failed(idx + 1, test, INPUT_STAGING_FAILED),
        };
        tracing::debug!(index = result.index, passed = result.passed, "Test finished");
        results.push(result);
    }

    Ok(results)
}

/// Feeds the test input to the program. Inputs that fit one exec argument are
/// piped inline; larger ones are staged to a file first. Returns `None` when
/// that staging fails.
async fn run_test(
    runner: &BoundedRunner,
    sandbox: &SandboxInstance,
    profile: &LanguageProfile,
    test: &TestCase,
) -> Result<Option<ExecOutcome>, EngineError> {
    let encoded = STANDARD.encode(&test.input);
    let program = profile.run_argv();

    let command = if encoded.len() <= STAGE_CHUNK_BYTES {
        with_prefix(PIPE_INPUT_SCRIPT, &encoded, &program)
    } else {
        let staged = stage_file(
            runner,
            sandbox,
            test.input.as_bytes(),
            STDIN_FILE,
            profile.stage_timeout,
            profile.max_output_bytes,
        )
        .await?;
        if !staged.succeeded() {
            tracing::warn!(status = ?staged.status, "Failed to stage test input");
            return Ok(None);
        }
        with_prefix(REDIRECT_INPUT_SCRIPT, STDIN_FILE, &program)
    };

    let outcome = runner
        .run(
            sandbox,
            &command,
            profile.run_timeout,
            profile.max_output_bytes,
        )
        .await?;
    Ok(Some(outcome))
}

fn with_prefix(script: &str, first: &str, program: &[String]) -> Vec<String> {
    let mut args = vec![first];
    args.extend(program.iter().map(String::as_str));
    shell(script, &args)
}

/// Outputs are compared after trimming trailing whitespace. A timed out run
/// never passes, whatever it printed before the deadline.
pub fn classify(index: usize, test: &TestCase, outcome: &ExecOutcome) -> TestCaseResult {
    if outcome.timed_out() {
        return failed(index, test, TIME_LIMIT_EXCEEDED);
    }

    let expected = test.expected_output.trim_end().to_string();
    let output = outcome.output_lossy().trim_end().to_string();
    TestCaseResult {
        index,
        input: test.input.clone(),
        passed: output == expected,
        expected,
        output,
    }
}

fn failed(index: usize, test: &TestCase, marker: &str) -> TestCaseResult {
    TestCaseResult {
        index,
        input: test.input.clone(),
        expected: test.expected_output.trim_end().to_string(),
        output: marker.to_string(),
        passed: false,
    }
}
