//! Approval prompts for the agent binary.

use sshgate_policy::{Approval, ApprovalInbox, ApprovalRequest};
use std::io::{self, BufRead, Write};

/// Map a typed answer to an approval. Anything unrecognised is `None`.
pub fn parse_answer(answer: &str) -> Option<Approval> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "n" | "no" => Some(Approval::Deny),
        "o" | "once" => Some(Approval::ApproveOnce),
        "c" | "command" => Some(Approval::ApproveCommandForever),
        "a" | "all" => Some(Approval::ApproveAllForever),
        _ => None,
    }
}

/// Answer requests from a terminal, one at a time, until every broker is gone.
///
/// Blocks the calling thread; run it on a dedicated thread. A closed input
/// denies every remaining request.
pub fn run_terminal<R, W>(mut inbox: ApprovalInbox, mut input: R, mut output: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    while let Some(req) = inbox.blocking_recv() {
        let answer = ask(&req, &mut input, &mut output)?;
        tracing::info!(scope = %req.scope, command = %req.command, %answer, "approval answered");
        if !req.respond(answer) {
            tracing::debug!("requester gave up before the answer");
        }
    }
    Ok(())
}

fn ask<R: BufRead, W: Write>(
    req: &ApprovalRequest,
    input: &mut R,
    output: &mut W,
) -> io::Result<Approval> {
    writeln!(output)?;
    writeln!(output, "sshgate: {} wants to run", req.scope)?;
    writeln!(output, "  {}", req.command_label())?;
    loop {
        write!(
            output,
            "Allow? [n]o / approve [o]nce / this [c]ommand forever / [a]ll commands forever: "
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(Approval::Deny);
        }
        match parse_answer(&line) {
            Some(answer) => return Ok(answer),
            None => writeln!(output, "Please answer n, o, c or a.")?,
        }
    }
}

/// Deny every request without asking. For headless runs.
pub async fn auto_deny(mut inbox: ApprovalInbox) {
    while let Some(req) = inbox.recv().await {
        tracing::info!(scope = %req.scope, command = %req.command, "auto-denied");
        req.respond(Approval::Deny);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshgate_policy::{ApprovalBroker, Scope};
    use std::io::Cursor;

    fn scope() -> Scope {
        Scope {
            client_username: "alice".into(),
            client_hostname: "db1".into(),
            client_port: 22,
            service_username: "alice".into(),
            service_hostname: "db1".into(),
        }
    }

    #[test]
    fn answers() {
        assert_eq!(parse_answer("n\n"), Some(Approval::Deny));
        assert_eq!(parse_answer(" O "), Some(Approval::ApproveOnce));
        assert_eq!(parse_answer("c"), Some(Approval::ApproveCommandForever));
        assert_eq!(parse_answer("all"), Some(Approval::ApproveAllForever));
        assert_eq!(parse_answer(""), None);
        assert_eq!(parse_answer("yes"), None);
    }

    #[tokio::test]
    async fn terminal_reprompts_then_answers() {
        let (broker, inbox) = ApprovalBroker::channel(1);
        let prompt = tokio::task::spawn_blocking(move || {
            let mut output = Vec::new();
            run_terminal(inbox, Cursor::new("maybe\na\n"), &mut output).unwrap();
            String::from_utf8(output).unwrap()
        });

        assert_eq!(broker.ask(scope(), "").await, Ok(Approval::ApproveAllForever));
        drop(broker);

        let transcript = prompt.await.unwrap();
        assert!(transcript.contains("<interactive shell>"));
        assert!(transcript.contains("Please answer"));
    }

    #[tokio::test]
    async fn closed_input_denies() {
        let (broker, inbox) = ApprovalBroker::channel(1);
        let prompt = tokio::task::spawn_blocking(move || {
            run_terminal(inbox, Cursor::new(""), io::sink()).unwrap();
        });

        assert_eq!(broker.ask(scope(), "ls").await, Ok(Approval::Deny));
        drop(broker);
        prompt.await.unwrap();
    }

    #[tokio::test]
    async fn auto_deny_denies() {
        let (broker, inbox) = ApprovalBroker::channel(1);
        tokio::spawn(auto_deny(inbox));
        assert_eq!(broker.ask(scope(), "ls").await, Ok(Approval::Deny));
    }
}
