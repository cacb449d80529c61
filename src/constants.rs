// Fixed instruction and env-derived defaults.

use std::env;

/// The concierge instruction every transcript is seeded with.
pub const SYSTEM_PROMPT: &str = r#"
あなたは「Aipia（アイピア） -AIが創る、秘境への旅行プラン-」の専属AIコンシェルジュです。

以下のルールを厳守して旅行プランを提案してください：
1. 目的：ユーザーが入力したキーワードや目的地から、まだ見ぬ「秘境」や「究極のスポット」を提案すること。
2. スポット優先：ユーザーが選択したスポットを「最優先事項」として必ずプランの軸に組み込むこと。
3. 構成：詳細すぎる分刻みのスケジュールではなく、1日の主要な動き（4〜5項目）に絞った、実現可能でワクワクする行程表を作ること。
4. 提案数：ユーザーを迷わせないよう、厳選した2パターンの旅行案を提示すること。
5. トーン：洗練された、かつ親しみやすいガイドのような口調で話すこと。

もし目的地が具体的すぎたり抽象的すぎたりしてプランが作れない場合は、優しく条件変更を提案してください。
"#;

pub const APP_TITLE: &str = "Aipia";
pub const APP_CAPTION: &str = "-AIが創る、秘境への旅行プラン-";
pub const INPUT_PLACEHOLDER: &str = "次はどこへ行きたいですか？";

pub const DEFAULT_PORT: u16 = 8501;

// Use lazy_static so env overrides are read once, on first use.
lazy_static::lazy_static! {
    pub static ref GROQ_API_URL: String = env::var("GROQ_API_URL")
        .unwrap_or_else(|_| "https://api.groq.com/openai/v1/chat/completions".to_string());
    pub static ref AIPIA_CHAT_MODEL: String = env::var("AIPIA_CHAT_MODEL")
        .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
}
