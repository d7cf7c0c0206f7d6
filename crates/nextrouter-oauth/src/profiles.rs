//! Built-in OAuth provider profiles selected by `oauth_mode`. A profile
//! supplies the token endpoint and the default refresh form; DSL
//! `oauth_token_url` / `oauth_form` rows layer on top (custom mode starts
//! from nothing and must supply both).

use nextrouter_dsl::OAuthMode;

#[derive(Debug, Clone, Default)]
pub struct OAuthProfile {
    pub token_url: &'static str,
    /// Form rows appended before the DSL-configured ones. The credential
    /// value itself is referenced as `$channel.key` and resolved by the
    /// engine like every other expression.
    pub form: &'static [(&'static str, &'static str)],
}

pub fn profile_for_mode(mode: OAuthMode) -> OAuthProfile {
    match mode {
        OAuthMode::OpenAI => OAuthProfile {
            token_url: "https://auth.openai.com/oauth/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::Claude => OAuthProfile {
            token_url: "https://console.anthropic.com/v1/oauth/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::Gemini | OAuthMode::Antigravity => OAuthProfile {
            token_url: "https://oauth2.googleapis.com/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::IFlow => OAuthProfile {
            token_url: "https://iflow.cn/oauth/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::Qwen => OAuthProfile {
            token_url: "https://chat.qwen.ai/api/v1/oauth2/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::Kimi => OAuthProfile {
            token_url: "https://auth.moonshot.cn/oauth/token",
            form: &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "$channel.key"),
            ],
        },
        OAuthMode::Custom => OAuthProfile::default(),
    }
}
