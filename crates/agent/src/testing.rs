use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use akka_core::errors::{BackendError, EmbeddingError};
use akka_core::prompt::GenerationOptions;
use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::llm::LlmClient;

const DIMENSIONS: usize = 256;

/// Bag-of-characters embedder; identical strings score exactly 1.0.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bucket(ch: char) -> usize {
    let mut hasher = DefaultHasher::new();
    ch.hash(&mut hasher);
    (hasher.finish() % DIMENSIONS as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|input| {
                let mut vector = vec![0.0_f32; DIMENSIONS];
                for ch in input.chars() {
                    vector[bucket(ch)] += 1.0;
                }
                vector
            })
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("connection refused".to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Replays queued replies in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn replying(replies: impl IntoIterator<Item = &'static str>) -> Self {
        let llm = Self::default();
        for reply in replies {
            llm.push(Ok(reply.to_string()));
        }
        llm
    }

    pub fn failing() -> Self {
        let llm = Self::default();
        llm.push(Err(BackendError::Transport {
            backend: "scripted",
            message: "connection reset".to_string(),
        }));
        llm
    }

    pub fn push(&self, reply: Result<String, BackendError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                prompt: prompt.to_string(),
                options: options.clone(),
            });
        }

        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| {
                Err(BackendError::Transport {
                    backend: "scripted",
                    message: "no scripted reply left".to_string(),
                })
            })
    }
}

pub const ROUTING: &str = r#"
[intents]
sensitive = "SENSITIVE"
benign_override = "RULES"
unknown = "UNKNOWN"

[[anchors]]
intent = "STORE_WIFI"
phrases = ["wifi密碼", "網路密碼"]

[[anchors]]
intent = "STORE_FEE"
phrases = ["低消怎麼算"]

[static_responses]
STORE_WIFI = ["WiFi 名稱 BoardGame_Guest，密碼 playmoregames。"]
STORE_FEE = ["平日每人 150 元可玩 4 小時，假日 200 元。"]

[handlers.SENSITIVE]
kind = "reject"
response = "這個話題我沒辦法回答喔。"

[handlers.RULES]
kind = "cloud_rag"
template = "rules"

[handlers.CHITCHAT]
kind = "local_llm"
persona = "staff"

[fallback]
responses = ["不好意思，可以換個說法嗎？"]

[messages]
generation_failure = "抱歉，規則查詢暫時失敗。"
reference_unavailable = "(no reference)"
"#;

pub const PROMPTS: &str = r#"
[classifier]
system_prompt = "Pick one label from: {{ intents }}. Reply as JSON."

[personas.staff]
system_prompt = "你是親切的桌遊店員。"

[rag.rules]
template = "[{{ activity }}]\n{{ reference }}\n{{ history }}"
"#;

pub const ACTIVITIES: &str = r#"
default = "avalon"

[[activity]]
id = "avalon"
display_name = "阿瓦隆"
aliases = ["Avalon"]
reference = "rules/avalon.md"
keywords = "rules/avalon_keywords.txt"
allowlist = ["阿瓦隆", "刺客", "殺手"]

[[activity]]
id = "carcassonne"
display_name = "卡卡頌"
keywords = "rules/carcassonne_keywords.txt"
allowlist = ["強盜"]
"#;

pub fn write_catalog(dir: &Path, routing: &str) {
    fs::create_dir_all(dir.join("rules")).expect("create rules dir");
    fs::write(dir.join("routing.toml"), routing).expect("write routing");
    fs::write(dir.join("prompts.toml"), PROMPTS).expect("write prompts");
    fs::write(dir.join("activities.toml"), ACTIVITIES).expect("write activities");
    fs::write(dir.join("rules/avalon.md"), "刺客在任務結束後指認梅林。").expect("write reference");
    fs::write(dir.join("rules/avalon_keywords.txt"), "梅林\n派西維爾\n刺客\n")
        .expect("write keywords");
    fs::write(dir.join("rules/carcassonne_keywords.txt"), "卡卡頌\n米寶\n板塊\n")
        .expect("write keywords");
}
