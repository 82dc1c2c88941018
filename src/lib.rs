pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod firebase;
pub mod history;
pub mod llm;
pub mod models;
pub mod profile;

use chat::{ ChatError, ChatSession, SendReport };
use cli::{ Args, Command, Credentials };
use config::replies::ReplyBook;
use config::{ Backend, ConfigError };
use diagnosis::{ DiagnosisOutcome, DiagnosisPipeline };
use log::{ info, warn };
use models::chat::Role;
use models::diagnosis::{ DiseaseLabel, ImageUpload };
use models::notice::Notice;
use models::user::{ SessionContext, UserProfile };
use profile::{ ProfileError, ProfileService, RegistrationForm };
use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };

type BoxError = Box<dyn Error + Send + Sync>;

fn build_profile_service(args: &Args) -> Result<ProfileService, ConfigError> {
    let service = match config::backend(args)? {
        Backend::Memory =>
            ProfileService::new(
                Arc::new(auth::MemoryAuth::new()),
                Arc::new(profile::MemoryProfileStore::new()),
                Arc::new(profile::MemoryBlobStore::new())
            ),
        Backend::Firebase => {
            let firebase = config::firebase_config(args)?;
            let bucket = firebase.storage_bucket
                .clone()
                .ok_or(ConfigError::Missing("FIREBASE_STORAGE_BUCKET"))?;
            ProfileService::new(
                Arc::new(auth::FirebaseAuth::new(&firebase)),
                Arc::new(profile::FirebaseProfileStore::new(&firebase.database_url)),
                Arc::new(profile::FirebaseBlobStore::new(&bucket))
            )
        }
    };
    Ok(service)
}

fn show(notice: &Notice) {
    eprintln!("[{}] {}", notice.title, notice.message);
}

async fn read_image(path: Option<&Path>) -> Result<Option<ImageUpload>, BoxError> {
    match path {
        Some(path) => Ok(Some(ImageUpload::from_path(path).await?)),
        None => Ok(None),
    }
}

async fn sign_in(
    profiles: &ProfileService,
    backend: Backend,
    credentials: &Credentials
) -> Result<(SessionContext, UserProfile), ProfileError> {
    if backend == Backend::Memory {
        // Memory accounts die with the process, so each run starts by creating one.
        let name = credentials.email.split('@').next().unwrap_or_default().to_string();
        profiles.register(RegistrationForm {
            name,
            email: credentials.email.clone(),
            password: credentials.password.clone(),
            confirm_password: credentials.password.clone(),
            profile_image: None,
        }).await?;
    }
    profiles.login(&credentials.email, &credentials.password).await
}

async fn open_session(
    args: &Args,
    ctx: SessionContext,
    replies: Arc<ReplyBook>
) -> Result<ChatSession, BoxError> {
    let store = history::create_chat_store(args)?;
    let llm = llm::chat::new_client(&config::llm_config(args)?)?;
    info!("Chat model: {}", llm.get_model());

    let mut session = ChatSession::new(ctx, store, llm, replies);
    if let Err(e) = session.initialize().await {
        warn!("Chat history unavailable, continuing without it: {}", e);
    }
    Ok(session)
}

fn print_reply(report: &SendReport) {
    println!("doctor> {}", report.reply.content);
    if !report.persisted() {
        println!("        (not saved)");
    }
}

async fn chat_loop(session: &ChatSession) -> Result<(), BoxError> {
    for msg in session.messages().await.iter().filter(|m| m.role != Role::System) {
        let who = if msg.role == Role::User { "you" } else { "doctor" };
        println!("{}> {}", who, msg.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/new" => {
                session.reset().await;
                println!("Started a new conversation.");
                continue;
            }
            _ => {}
        }
        match session.send(&line).await {
            Ok(report) => print_reply(&report),
            Err(ChatError::EmptyMessage) => continue,
        }
    }
    Ok(())
}

async fn start_chat(
    args: &Args,
    ctx: SessionContext,
    replies: Arc<ReplyBook>,
    disease: Option<DiseaseLabel>
) -> Result<(), BoxError> {
    let session = open_session(args, ctx, replies).await?;
    if let Some(label) = disease {
        let report = session.seed_from_diagnosis(label).await?;
        println!("you> Tell me about Eggplant {}", label);
        print_reply(&report);
    }
    chat_loop(&session).await?;
    session.close();
    Ok(())
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    info!("--- Core Configuration ---");
    info!("Backend: {}", args.backend);
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("Classifier URL: {}", args.classifier_url.as_deref().unwrap_or("<unset>"));
    info!("Search URL: {}", args.search_url);
    info!("Translate URL: {}", args.translate_url);
    info!("Translate Target: {}", args.translate_target);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("<provider default>"));
    info!("Replies Path: {}", args.replies_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<builtin>".to_string()));
    info!("-------------------------");

    let backend = config::backend(&args)?;
    let replies = ReplyBook::load_or_builtin(args.replies_path.as_deref())?;

    match &args.command {
        Command::Register { name, credentials, confirm_password, profile_image } => {
            let profiles = build_profile_service(&args)?;
            let form = RegistrationForm {
                name: name.clone(),
                email: credentials.email.clone(),
                password: credentials.password.clone(),
                confirm_password: confirm_password.clone(),
                profile_image: read_image(profile_image.as_deref()).await?,
            };
            match profiles.register(form).await {
                Ok(ctx) => {
                    println!("Registered {} ({})", ctx.email, ctx.user_id);
                    profiles.logout(ctx);
                }
                Err(e) => show(&e.notice()),
            }
        }
        Command::Login { credentials } => {
            let profiles = build_profile_service(&args)?;
            match sign_in(&profiles, backend, credentials).await {
                Ok((ctx, profile)) => {
                    println!("Name:  {}", profile.name);
                    println!("Email: {}", profile.email);
                    if let Some(url) = &profile.profile_image {
                        println!("Image: {}", url);
                    }
                    profiles.logout(ctx);
                }
                Err(e) => show(&e.notice()),
            }
        }
        Command::Diagnose { credentials, image, translated, chat } => {
            let mut pipeline = DiagnosisPipeline::from_config(&config::diagnosis_config(&args)?);
            let outcome = pipeline.diagnose(read_image(image.as_deref()).await?).await;
            let (result, info) = match outcome {
                DiagnosisOutcome::Ready { result, info } => (result, info),
                DiagnosisOutcome::NoImage(notice) | DiagnosisOutcome::Rejected(notice) => {
                    show(&notice);
                    return Ok(());
                }
                DiagnosisOutcome::Failed(e) => {
                    eprintln!("Diagnosis failed: {}", e);
                    return Ok(());
                }
            };

            let label = result.label;
            let mut view = pipeline.view(result, info);
            if *translated {
                view.toggle();
            }
            println!("{}", view.render());

            if *chat {
                let profiles = build_profile_service(&args)?;
                match sign_in(&profiles, backend, credentials).await {
                    Ok((ctx, _)) => start_chat(&args, ctx, replies, Some(label)).await?,
                    Err(e) => show(&e.notice()),
                }
            }
        }
        Command::Chat { credentials, disease } => {
            let label = match disease.as_deref().map(str::parse::<DiseaseLabel>) {
                Some(Ok(label)) => Some(label),
                Some(Err(e)) => {
                    show(&diagnosis::unrecognized_notice(&e.to_string()));
                    return Ok(());
                }
                None => None,
            };
            let profiles = build_profile_service(&args)?;
            match sign_in(&profiles, backend, credentials).await {
                Ok((ctx, _)) => start_chat(&args, ctx, replies, label).await?,
                Err(e) => show(&e.notice()),
            }
        }
        Command::ProfileImage { credentials, image } => {
            let upload = ImageUpload::from_path(image).await?;
            let profiles = build_profile_service(&args)?;
            let (ctx, _) = match sign_in(&profiles, backend, credentials).await {
                Ok(signed_in) => signed_in,
                Err(e) => {
                    show(&e.notice());
                    return Ok(());
                }
            };
            match profiles.update_profile_image(&ctx, &upload).await {
                Ok(url) => println!("Profile image updated: {}", url),
                Err(e) => show(&e.notice()),
            }
            profiles.logout(ctx);
        }
        Command::ChangePassword { credentials, new_password, confirm_password } => {
            let profiles = build_profile_service(&args)?;
            let (ctx, _) = match sign_in(&profiles, backend, credentials).await {
                Ok(signed_in) => signed_in,
                Err(e) => {
                    show(&e.notice());
                    return Ok(());
                }
            };
            match profiles.change_password(&ctx, &credentials.password, new_password, confirm_password).await {
                Ok(fresh) => {
                    println!("Your password has been reset successfully.");
                    profiles.logout(fresh);
                }
                Err(e) => show(&e.notice()),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::parse_isolated;

    #[tokio::test]
    async fn diagnose_without_chat_needs_no_identity_backend() {
        let args = parse_isolated(&[
            "eggplant-doctor",
            "--backend",
            "firebase",
            "--firebase-api-key",
            "",
            "--classifier-url",
            "http://127.0.0.1:9/predict",
            "--google-api-key",
            "g",
            "--search-engine-id",
            "cx",
            "diagnose",
        ]);
        assert!(run(args).await.is_ok());
    }

    #[tokio::test]
    async fn identity_commands_still_require_the_backend() {
        let args = parse_isolated(&["eggplant-doctor", "--backend", "firebase", "--firebase-api-key", "", "login"]);
        let err = run(args).await.unwrap_err();
        assert!(err.to_string().contains("FIREBASE_API_KEY"));
    }
}
