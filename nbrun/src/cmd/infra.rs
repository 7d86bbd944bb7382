//! The `create-infrastructure` subcommand.

use std::io::{self, Write};
use std::thread::sleep;

use anyhow::anyhow;
use nbrun_common::aws;
use nbrun_common::prelude::*;
use structopt::StructOpt;

/// The CloudFormation template defining the Lambda function and IAM roles.
const CLOUDFORMATION_TEMPLATE: &str = include_str!("cloudformation.yml");

/// The stack everything is created under.
const STACK_NAME: &str = "sagemaker-run-notebook";

/// The `create-infrastructure` subcommand.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// Update existing infrastructure instead of creating it.
    #[structopt(long = "update")]
    update: bool,

    /// Return without waiting for the stack operation to finish.
    #[structopt(long = "no-wait")]
    no_wait: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateStackResponse {
    stack_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksResponse {
    stacks: Vec<Stack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Stack {
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
}

/// Run the `create-infrastructure` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    let action = if opt.update {
        "update-stack"
    } else {
        "create-stack"
    };
    let result: Result<CreateStackResponse> = aws::aws_parse_json(&[
        "cloudformation",
        action,
        "--stack-name",
        STACK_NAME,
        "--template-body",
        CLOUDFORMATION_TEMPLATE,
        "--capabilities",
        "CAPABILITY_NAMED_IAM",
    ]);
    let response = match result {
        Err(ref err) if err.platform_code() == Some("AlreadyExistsException") => {
            println!("The infrastructure has already been created. Use --update to update it.");
            return Ok(());
        }
        Err(ref err)
            if err.platform_code() == Some("ValidationError")
                && err.to_string().contains("No updates are to be performed") =>
        {
            println!("The infrastructure is already up-to-date. No work to do.");
            return Ok(());
        }
        other => other?,
    };
    println!("Creating CloudFormation stack {}", response.stack_id);
    if opt.no_wait {
        return Ok(());
    }

    let (status, reason) = wait_for_stack(&response.stack_id)?;
    if status == "CREATE_COMPLETE" || status == "UPDATE_COMPLETE" {
        println!("Stack successfully {}", if opt.update { "updated" } else { "created" });
        Ok(())
    } else {
        Err(anyhow!(
            "unexpected stack state {}: {}",
            status,
            reason.unwrap_or_else(|| "(no reason given)".to_owned()),
        )
        .into())
    }
}

/// Poll until the stack operation finishes, printing progress dots.
fn wait_for_stack(stack_id: &str) -> Result<(String, Option<String>)> {
    loop {
        let response: DescribeStacksResponse = aws::retry_throttled(|| {
            aws::aws_parse_json(&[
                "cloudformation",
                "describe-stacks",
                "--stack-name",
                stack_id,
            ])
        })?;
        let stack = response
            .stacks
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("stack {} not found", stack_id))?;
        if !stack.stack_status.contains("IN_PROGRESS") {
            println!();
            return Ok((stack.stack_status, stack.stack_status_reason));
        }
        print!(".");
        let _ = io::stdout().flush();
        sleep(Duration::from_secs(10));
    }
}
