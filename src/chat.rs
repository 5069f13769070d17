//! `ragchat ask` and the interactive `ragchat chat` loop.

use std::io::Write;

use anyhow::Result;
use ragchat_core::models::Answer;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::rag::RagService;

/// Answer one question and print it.
pub async fn run_ask(
    service: &RagService,
    question: &str,
    session_id: &str,
    use_memory: bool,
) -> Result<()> {
    let answer = service.answer(session_id, question, use_memory).await?;
    print_answer(&answer);
    Ok(())
}

/// Read questions from stdin until EOF or `/exit`.
///
/// `/clear` forgets the session's conversation. A failed answer is reported
/// and the loop continues; the failed turn is not remembered.
pub async fn run_chat(service: &RagService, session_id: &str) -> Result<()> {
    println!("ragchat session '{}'. /clear resets the conversation, /exit quits.", session_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                service.clear_session(session_id);
                println!("conversation cleared");
            }
            question => match service.answer(session_id, question, true).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        let sources: Vec<&str> = answer.sources.iter().map(String::as_str).collect();
        println!();
        println!("Sources: {}", sources.join(", "));
    }
}
