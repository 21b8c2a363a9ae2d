//! Telegram operator console.
//!
//! One bot, one operator group. Approval prompts and join announcements are
//! sent with inline keyboards; button presses resolve pending oneshot
//! channels. Mission visibility lines are threaded as replies to the
//! mission's root message.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    teloxide::{
        prelude::*,
        payloads::SendMessageSetters,
        types::{
            AllowedUpdate, CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup,
            MessageId, ReplyParameters, UpdateKind,
        },
    },
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use intercom_policy::GrantScope;

use crate::{ApprovalChoice, ApprovalPrompt, JoinDecision, OperatorConsole};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Keeps inline-keyboard waits from outliving the router's own parking.
const DEFAULT_APPROVAL_WAIT: Duration = Duration::from_secs(600);
const DEFAULT_JOIN_WAIT: Duration = Duration::from_secs(300);

type PendingMap<T> = Arc<std::sync::Mutex<HashMap<String, oneshot::Sender<T>>>>;

/// Operator console over a Telegram bot.
pub struct TelegramConsole {
    bot: Bot,
    group: ChatId,
    owner_id: Option<i64>,
    approval_wait: Duration,
    join_wait: Duration,
    pending_approvals: PendingMap<ApprovalChoice>,
    pending_joins: PendingMap<JoinDecision>,
    mission_roots: Arc<std::sync::Mutex<HashMap<String, MessageId>>>,
    cancel: CancellationToken,
}

impl TelegramConsole {
    pub fn new(bot_token: &str, group_id: i64, owner_id: Option<i64>) -> Self {
        Self {
            bot: Bot::new(bot_token),
            group: ChatId(group_id),
            owner_id,
            approval_wait: DEFAULT_APPROVAL_WAIT,
            join_wait: DEFAULT_JOIN_WAIT,
            pending_approvals: Arc::new(std::sync::Mutex::new(HashMap::new())),
            pending_joins: Arc::new(std::sync::Mutex::new(HashMap::new())),
            mission_roots: Arc::new(std::sync::Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Start the update polling loop. Returns a token that stops it.
    pub async fn start(&self) -> anyhow::Result<CancellationToken> {
        let me = self.bot.get_me().await?;
        // Long polling requires no webhook.
        self.bot.delete_webhook().send().await?;
        info!(username = ?me.username, "telegram console connected");

        let bot = self.bot.clone();
        let cancel = self.cancel.clone();
        let owner_id = self.owner_id;
        let approvals = Arc::clone(&self.pending_approvals);
        let joins = Arc::clone(&self.pending_joins);

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            let mut offset: i32 = 0;
            loop {
                if cancel_clone.is_cancelled() {
                    info!("telegram console polling stopped");
                    break;
                }

                let result = bot
                    .get_updates()
                    .offset(offset)
                    .timeout(30)
                    .allowed_updates(vec![AllowedUpdate::CallbackQuery])
                    .await;

                match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = update.id.as_offset();
                            if let UpdateKind::CallbackQuery(query) = update.kind {
                                handle_callback(&bot, query, owner_id, &approvals, &joins).await;
                            }
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "telegram get_updates failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    },
                }
            }
        });

        Ok(cancel)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send_to_group(&self, text: &str) -> Option<MessageId> {
        let text = truncate(text, TELEGRAM_MAX_MESSAGE_LEN);
        match self.bot.send_message(self.group, text).await {
            Ok(msg) => Some(msg.id),
            Err(e) => {
                warn!(error = %e, "failed to post to operator group");
                None
            },
        }
    }

    fn register_approval(&self, id: &str) -> oneshot::Receiver<ApprovalChoice> {
        let (tx, rx) = oneshot::channel();
        self.pending_approvals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), tx);
        rx
    }

    fn register_join(&self, id: &str) -> oneshot::Receiver<JoinDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending_joins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), tx);
        rx
    }

    fn drop_pending(&self, id: &str) {
        self.pending_approvals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.pending_joins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[async_trait]
impl OperatorConsole for TelegramConsole {
    async fn announce_join(
        &self,
        machine_id: &str,
        display_name: &str,
        overlay_ip: &str,
    ) -> JoinDecision {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let rx = self.register_join(&id);

        let text = format!(
            "🔑 Join request\nmachine: {machine_id}\nname: {display_name}\noverlay: {overlay_ip}"
        );
        let keyboard = InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::callback("Approve", format!("join:{id}:approve")),
            InlineKeyboardButton::callback("Deny", format!("join:{id}:deny")),
        ]]);
        if self
            .bot
            .send_message(self.group, text)
            .reply_markup(keyboard)
            .await
            .is_err()
        {
            self.drop_pending(&id);
            return JoinDecision::Pending;
        }

        match tokio::time::timeout(self.join_wait, rx).await {
            Ok(Ok(decision)) => decision,
            _ => {
                debug!(machine_id, "join announcement timed out, staying pending");
                self.drop_pending(&id);
                JoinDecision::Pending
            },
        }
    }

    async fn ask_approval(&self, prompt: ApprovalPrompt) -> ApprovalChoice {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let rx = self.register_approval(&id);

        let text = format!(
            "⚖️ Approval needed\n{} → {} ({})\n\n{}",
            prompt.from,
            prompt.to,
            prompt.kind,
            truncate(&prompt.preview, 500),
        );

        let mut rows = vec![vec![
            InlineKeyboardButton::callback("Allow", format!("apr:{id}:allow")),
            InlineKeyboardButton::callback("Deny", format!("apr:{id}:deny")),
        ]];
        let mut wide = Vec::new();
        if prompt.scopes.contains(&GrantScope::Mission) {
            wide.push(InlineKeyboardButton::callback(
                "Allow for mission",
                format!("apr:{id}:mission"),
            ));
        }
        if prompt.scopes.contains(&GrantScope::Session) {
            wide.push(InlineKeyboardButton::callback(
                "Allow for session",
                format!("apr:{id}:session"),
            ));
        }
        if !wide.is_empty() {
            rows.push(wide);
        }

        if self
            .bot
            .send_message(self.group, text)
            .reply_markup(InlineKeyboardMarkup::new(rows))
            .await
            .is_err()
        {
            self.drop_pending(&id);
            return ApprovalChoice::Timeout;
        }

        match tokio::time::timeout(self.approval_wait, rx).await {
            Ok(Ok(choice)) => choice,
            _ => {
                warn!(mission_id = %prompt.mission_id, "approval prompt timed out");
                self.drop_pending(&id);
                ApprovalChoice::Timeout
            },
        }
    }

    async fn post_to_mission(&self, mission_id: &str, text: &str) {
        let root = {
            self.mission_roots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(mission_id)
                .copied()
        };

        match root {
            Some(root_id) => {
                let text = truncate(text, TELEGRAM_MAX_MESSAGE_LEN);
                if let Err(e) = self
                    .bot
                    .send_message(self.group, text)
                    .reply_parameters(ReplyParameters::new(root_id))
                    .await
                {
                    warn!(mission_id, error = %e, "failed to post mission line");
                }
            },
            None => {
                let short = &mission_id[..mission_id.len().min(8)];
                let header = format!("📋 mission {short}\n{text}");
                if let Some(msg_id) = self.send_to_group(&header).await {
                    self.mission_roots
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(mission_id.to_string(), msg_id);
                }
            },
        }
    }

    async fn notify_feedback(&self, kind: &str, text: &str) {
        self.send_to_group(&format!("📣 {kind}: {text}")).await;
    }
}

async fn handle_callback(
    bot: &Bot,
    query: CallbackQuery,
    owner_id: Option<i64>,
    approvals: &PendingMap<ApprovalChoice>,
    joins: &PendingMap<JoinDecision>,
) {
    let Some(data) = query.data.clone() else {
        let _ = bot.answer_callback_query(&query.id).await;
        return;
    };

    if let Some(owner) = owner_id
        && i64::try_from(query.from.id.0).ok() != Some(owner)
    {
        let _ = bot
            .answer_callback_query(&query.id)
            .text("not authorised")
            .await;
        return;
    }

    let mut parts = data.splitn(3, ':');
    let (ns, id, choice) = (
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
    );

    let ack = match ns {
        "apr" => {
            let answer = match choice {
                "allow" => Some(ApprovalChoice::Allow(GrantScope::Once)),
                "mission" => Some(ApprovalChoice::Allow(GrantScope::Mission)),
                "session" => Some(ApprovalChoice::Allow(GrantScope::Session)),
                "always" => Some(ApprovalChoice::Allow(GrantScope::AlwaysAllow)),
                "deny" => Some(ApprovalChoice::Deny),
                _ => None,
            };
            match answer {
                Some(a) => {
                    let tx = approvals
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(id);
                    match tx {
                        Some(tx) => {
                            let _ = tx.send(a);
                            "recorded"
                        },
                        None => "already resolved",
                    }
                },
                None => "unknown choice",
            }
        },
        "join" => {
            let answer = match choice {
                "approve" => Some(JoinDecision::Approved),
                "deny" => Some(JoinDecision::Denied),
                _ => None,
            };
            match answer {
                Some(a) => {
                    let tx = joins.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
                    match tx {
                        Some(tx) => {
                            let _ = tx.send(a);
                            "recorded"
                        },
                        None => "already resolved",
                    }
                },
                None => "unknown choice",
            }
        },
        _ => "unknown action",
    };

    debug!(data, ack, "callback handled");
    let _ = bot.answer_callback_query(&query.id).text(ack).await;
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max.saturating_sub(1);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 100), "short");
        let cut = truncate("épée épée épée", 6);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= 9);
    }
}
