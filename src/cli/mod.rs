use clap::{ Args as ClapArgs, Parser, Subcommand };
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    // --- Identity / Profile Backend Args ---
    /// Backend for authentication, profile records and profile images (firebase, memory)
    #[arg(long, env = "BACKEND", default_value = "firebase", global = true)]
    pub backend: String,

    /// Web API key of the Firebase project
    #[arg(long, env = "FIREBASE_API_KEY", default_value = "", hide_env_values = true, global = true)]
    pub firebase_api_key: String,

    /// Realtime Database root URL (e.g., https://my-project-default-rtdb.firebaseio.com)
    #[arg(long, env = "FIREBASE_DATABASE_URL", global = true)]
    pub firebase_database_url: Option<String>,

    /// Cloud Storage bucket used for profile images (e.g., my-project.appspot.com)
    #[arg(long, env = "FIREBASE_STORAGE_BUCKET", global = true)]
    pub firebase_storage_bucket: Option<String>,

    /// Identity Toolkit endpoint root
    #[arg(long, env = "FIREBASE_AUTH_URL", default_value = "https://identitytoolkit.googleapis.com/v1", global = true)]
    pub firebase_auth_url: String,

    // --- History Store Args ---
    /// Chat history store type (firebase, redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "firebase", global = true)]
    pub history_type: String,

    /// History store host endpoint for redis (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379", global = true)]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "users:", global = true)]
    pub history_redis_prefix: String,

    // --- Diagnosis Args ---
    /// Remote image classification endpoint (multipart POST with a `file` field)
    #[arg(long, env = "CLASSIFIER_URL", global = true)]
    pub classifier_url: Option<String>,

    /// Google API key for custom search and translation
    #[arg(long, env = "GOOGLE_API_KEY", default_value = "", hide_env_values = true, global = true)]
    pub google_api_key: String,

    /// Custom search engine id
    #[arg(long, env = "SEARCH_ENGINE_ID", default_value = "", global = true)]
    pub search_engine_id: String,

    #[arg(long, env = "SEARCH_URL", default_value = "https://www.googleapis.com/customsearch/v1", global = true)]
    pub search_url: String,

    #[arg(long, env = "TRANSLATE_URL", default_value = "https://translation.googleapis.com/language/translate/v2", global = true)]
    pub translate_url: String,

    /// Language code disease information is translated into
    #[arg(long, env = "TRANSLATE_TARGET", default_value = "ur", global = true)]
    pub translate_target: String,

    #[arg(long, env = "SOURCE_LANGUAGE_NAME", default_value = "English", global = true)]
    pub source_language_name: String,

    #[arg(long, env = "TRANSLATED_LANGUAGE_NAME", default_value = "Urdu", global = true)]
    pub translated_language_name: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, gemini, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai", global = true)]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API
    #[arg(long, env = "CHAT_BASE_URL", global = true)] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true, global = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o, a fine-tuned model id, gemini-1.5-flash-latest)
    #[arg(long, env = "CHAT_MODEL", global = true)] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.2", global = true)]
    pub chat_temperature: f32,

    /// Optional JSON file overriding the system prompt, fallback reply and disease replies.
    #[arg(long, env = "REPLIES_PATH", global = true)]
    pub replies_path: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Credentials {
    #[arg(long, env = "EGGPLANT_EMAIL", default_value = "")]
    pub email: String,

    #[arg(long, env = "EGGPLANT_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account and its profile record.
    Register {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        confirm_password: String,
        #[arg(long)]
        profile_image: Option<PathBuf>,
    },
    /// Sign in and print the stored profile.
    Login {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Classify a leaf photo and show the disease information.
    Diagnose {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Show the translated information instead of the source-language text.
        #[arg(long)]
        translated: bool,
        /// Continue into a chat seeded with the diagnosed disease.
        #[arg(long)]
        chat: bool,
    },
    /// Chat with the eggplant doctor. `/new` starts over, `/quit` leaves.
    Chat {
        #[command(flatten)]
        credentials: Credentials,
        /// Disease label to open the conversation with.
        #[arg(long)]
        disease: Option<String>,
    },
    /// Replace the profile picture.
    ProfileImage {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        image: PathBuf,
    },
    /// Change the account password.
    ChangePassword {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        new_password: String,
        #[arg(long)]
        confirm_password: String,
    },
}
