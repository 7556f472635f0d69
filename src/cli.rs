//! CLI subcommand handlers.
//!
//! The CLI stands in for the chat layer: it translates terminal input into
//! graded recall events and renders what the core hands back. Nothing here
//! touches review math or scheduling decisions.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use dialoguer::{Confirm, Input};
use srs_core::{estimated_retention, LearnerId};
use std::sync::Arc;

use crate::config::Config;
use crate::session::{SessionCoordinator, SessionError};
use crate::storage::ReviewStore;

#[derive(Subcommand, Debug)]
pub enum CardCommands {
    /// Add a vocabulary card (first exposure schedules it immediately)
    Add {
        /// Learner id
        #[arg(short, long)]
        learner: LearnerId,
        /// The word to learn
        word: String,
        /// Its translation
        translation: String,
    },
    /// List a learner's cards with their review state
    List {
        #[arg(short, long)]
        learner: LearnerId,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show which cards are due right now
    Due {
        #[arg(short, long)]
        learner: LearnerId,
    },
}

pub async fn handle_card(cmd: CardCommands, store: Arc<dyn ReviewStore>) -> Result<()> {
    match cmd {
        CardCommands::Add {
            learner,
            word,
            translation,
        } => {
            let card = store.add_card(learner, &word, &translation).await?;
            println!("Card #{}: {} = {}", card.item_id, card.word, card.translation);
        }
        CardCommands::List { learner, json } => {
            let cards = store.list_cards(learner).await?;
            let records = store.list_records(learner).await?;
            if json {
                let rows: Vec<serde_json::Value> = cards
                    .iter()
                    .map(|c| {
                        let rec = records.iter().find(|r| r.item_id == c.item_id);
                        serde_json::json!({ "card": c, "record": rec })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if cards.is_empty() {
                println!("No cards yet. Add one with `vocab-coach card add`.");
                return Ok(());
            }
            let now = Utc::now();
            for card in &cards {
                let Some(rec) = records.iter().find(|r| r.item_id == card.item_id) else {
                    continue;
                };
                let status = if rec.is_due(now) {
                    "due now".to_string()
                } else {
                    format!("due {}", rec.due_at.format("%Y-%m-%d"))
                };
                let retention = rec
                    .last_reviewed_at
                    .map(|last| {
                        let days = (now - last).num_days().max(0) as u32;
                        format!(", est. retention {:.0}%", estimated_retention(days, rec.ease_factor) * 100.0)
                    })
                    .unwrap_or_default();
                println!(
                    "#{:<4} {:<20} {:<20} [{} | streak {} | ease {:.2}{}]",
                    card.item_id, card.word, card.translation, status, rec.repetition_count,
                    rec.ease_factor, retention
                );
            }
        }
        CardCommands::Due { learner } => {
            let now = Utc::now();
            let due = store.list_due(learner, now).await?;
            if due.is_empty() {
                println!("Nothing due. Come back later.");
                return Ok(());
            }
            println!("{} card(s) due:", due.len());
            for rec in &due {
                if let Some(card) = store.get_card(learner, rec.item_id).await? {
                    let overdue_days = (now - rec.due_at).num_days();
                    println!("  {} (overdue {} day(s))", card.word, overdue_days.max(0));
                }
            }
        }
    }
    Ok(())
}

/// Interactive review session: show the word, reveal the translation, ask for
/// a 0-5 recall grade, feed it through the coordinator.
pub async fn handle_review(
    store: Arc<dyn ReviewStore>,
    config: &Config,
    learner: LearnerId,
) -> Result<()> {
    let coordinator = SessionCoordinator::new(
        store.clone(),
        config.session.size_limit,
        config.session_idle_timeout(),
    );

    let view = match coordinator.start_session(learner, Utc::now()).await {
        Ok(view) => view,
        Err(SessionError::NoItemsDue) => {
            println!("Nothing due for review. Well done!");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Reviewing {} card(s). Grade each recall 0-5 (3+ = pass).", view.items.len());

    loop {
        let item_id = match coordinator.current_item(view.id, Utc::now()).await {
            Ok(Some(id)) => id,
            // Batch exhausted (the session auto-completed) or idle-expired.
            Ok(None) | Err(SessionError::SessionNotActive) => break,
            Err(e) => return Err(e.into()),
        };
        let Some(card) = store.get_card(learner, item_id).await? else {
            // Card erased out from under the session; skip it by ending here.
            break;
        };

        println!("\n  {}", card.word);
        if Confirm::new()
            .with_prompt("Show translation?")
            .default(true)
            .interact()?
        {
            println!("  = {}", card.translation);
        }

        let grade: u8 = Input::new()
            .with_prompt("How well did you recall it? (0-5)")
            .validate_with(|input: &u8| {
                if *input <= 5 {
                    Ok(())
                } else {
                    Err("grade must be between 0 and 5")
                }
            })
            .interact_text()?;

        let updated = coordinator
            .submit_answer(view.id, item_id, grade, Utc::now())
            .await?;
        if updated.interval_days == 1 && updated.repetition_count == 0 {
            println!("  Back to tomorrow. It'll stick next time.");
        } else {
            println!("  Next review in {} day(s).", updated.interval_days);
        }
    }

    // Session may have auto-completed on the last grade.
    match coordinator.end_session(view.id).await {
        Ok(summary) => println!(
            "\nSession done: {}/{} card(s) graded.",
            summary.graded, summary.selected
        ),
        Err(SessionError::UnknownSession(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Erase every card and review record for a learner.
pub async fn handle_erase(store: Arc<dyn ReviewStore>, learner: LearnerId, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt(format!("Delete all data for learner {learner}?"))
            .default(false)
            .interact()?
    {
        println!("Aborted.");
        return Ok(());
    }
    store.erase_learner(learner).await?;
    println!("All data for learner {learner} removed.");
    Ok(())
}
