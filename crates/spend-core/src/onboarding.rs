//! Register/login conversation for a chat that is not authorized yet.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    actor::{ChatActor, Flow},
    credentials::{Authenticator, CreateOutcome, LoginOutcome},
    domain::{ChatId, MessageId, SenderHandle, UtcOffset},
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, Keyboard, OutgoingMessage},
    },
};

pub const CMD_REGISTER: &str = "register";
pub const CMD_LOGIN: &str = "login";

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 15;
pub const PASSWORD_MAX_LEN: usize = 15;

/// Country choices offered during registration.
pub const COUNTRIES: &[&str] = &[
    "Belarus (UTC+3)",
    "Russia, Moscow (UTC+3)",
    "Poland (UTC+2)",
    "Ukraine (UTC+3)",
    "Georgia (UTC+4)",
    "Sri Lanka (UTC+5:30)",
    "Nepal (UTC+5:45)",
    "USA, California (UTC-7)",
    "USA, New York (UTC-4)",
];

const CHOOSE_COUNTRY: &str = "Choose your country and timezone. \
We need it to know when your day ends so expenses can be split by day. \
You will be able to change this later.\n\n\
While we are in beta, the country can only be picked from the list.";

const HOW_TO_RECORD: &str = "To record an expense send a message like\n\n\
coffee 3.5\n\n\
Exactly two words separated by a space: the category and the amount. \
Use dots for subcategories, e.g. food.outside 12";

/// Sent upward when a chat finishes onboarding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub username: String,
    pub chat_id: ChatId,
    pub sender: SenderHandle,
    pub offset: UtcOffset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Register,
    Login,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Username,
    Country,
    Password,
}

/// The one prompt this conversation is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pending {
    mode: Mode,
    step: Step,
    prompt: MessageId,
}

#[derive(Clone, Debug, Default)]
struct Scratch {
    username: Option<String>,
    country: Option<String>,
    offset: Option<UtcOffset>,
    password: Option<String>,
}

/// Report bot names shown in the post-onboarding instructions.
#[derive(Clone, Debug)]
pub struct ReporterNames {
    pub daily: String,
    pub monthly: String,
}

pub struct OnboardingActor {
    chat_id: ChatId,
    auth: Authenticator,
    messenger: Arc<dyn MessagingPort>,
    reporters: ReporterNames,
    completions: mpsc::UnboundedSender<Completion>,
    pending: Option<Pending>,
    scratch: Scratch,
}

impl OnboardingActor {
    pub fn new(
        chat_id: ChatId,
        auth: Authenticator,
        messenger: Arc<dyn MessagingPort>,
        reporters: ReporterNames,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            chat_id,
            auth,
            messenger,
            reporters,
            completions,
            pending: None,
            scratch: Scratch::default(),
        }
    }

    async fn start(&mut self, mode: Mode, msg: &InboundMessage) {
        let text = match mode {
            Mode::Register => format!(
                "Enter a username. Minimum {USERNAME_MIN_LEN}, maximum {USERNAME_MAX_LEN} characters"
            ),
            Mode::Login => "Enter your username".to_string(),
        };
        if self.prompt(mode, Step::Username, msg, text, None).await {
            self.scratch = Scratch::default();
        }
    }

    /// Send a prompt and make it the outstanding one.
    ///
    /// On a transport failure the previous prompt stays outstanding.
    async fn prompt(
        &mut self,
        mode: Mode,
        step: Step,
        msg: &InboundMessage,
        text: String,
        keyboard: Option<Keyboard>,
    ) -> bool {
        let mut out = OutgoingMessage::reply(msg, text);
        out.keyboard = keyboard;
        match self.messenger.send(out).await {
            Ok(sent) => {
                self.pending = Some(Pending {
                    mode,
                    step,
                    prompt: sent.message_id,
                });
                true
            }
            Err(e) => {
                error!(chat_id = self.chat_id.0, ?step, "failed to send prompt: {e}");
                false
            }
        }
    }

    async fn ask_country(&mut self, msg: &InboundMessage, text: String) -> bool {
        let options = COUNTRIES.iter().map(|c| c.to_string()).collect();
        self.prompt(
            Mode::Register,
            Step::Country,
            msg,
            text,
            Some(Keyboard::Options(options)),
        )
        .await
    }

    async fn ask_password(&mut self, mode: Mode, msg: &InboundMessage, text: String) -> bool {
        self.prompt(mode, Step::Password, msg, text, Some(Keyboard::Remove))
            .await
    }

    async fn on_username(&mut self, mode: Mode, msg: &InboundMessage) -> Flow {
        let candidate = msg.text.trim().to_string();
        if !valid_username(&candidate) {
            debug!(chat_id = self.chat_id.0, "rejected username");
            self.prompt(
                mode,
                Step::Username,
                msg,
                "You entered an invalid username. Try again!".to_string(),
                None,
            )
            .await;
            return Flow::Continue;
        }

        match mode {
            Mode::Register if self.scratch.password.is_some() && self.scratch.offset.is_some() => {
                // Retrying after a duplicate: country and password are already known.
                self.scratch.username = Some(candidate);
                self.commit_register(msg).await
            }
            Mode::Register => {
                if self.ask_country(msg, CHOOSE_COUNTRY.to_string()).await {
                    self.scratch.username = Some(candidate);
                }
                Flow::Continue
            }
            Mode::Login => {
                if self
                    .ask_password(mode, msg, "Enter your password".to_string())
                    .await
                {
                    self.scratch.username = Some(candidate);
                }
                Flow::Continue
            }
        }
    }

    async fn on_country(&mut self, msg: &InboundMessage) -> Flow {
        let Some((country, offset)) = parse_country_label(&msg.text) else {
            warn!(chat_id = self.chat_id.0, text = %msg.text, "could not parse country label");
            self.ask_country(
                msg,
                "Could not read the timezone from your answer. Please pick a country from the list."
                    .to_string(),
            )
            .await;
            return Flow::Continue;
        };

        let text = format!("Enter a password. Maximum {PASSWORD_MAX_LEN} characters");
        if self.ask_password(Mode::Register, msg, text).await {
            debug!(chat_id = self.chat_id.0, %country, %offset, "country chosen");
            self.scratch.country = Some(country);
            self.scratch.offset = Some(offset);
        }
        Flow::Continue
    }

    async fn on_password(&mut self, mode: Mode, msg: &InboundMessage) -> Flow {
        let password = msg.text.clone();
        if !valid_password(&password) {
            let name = self.scratch.username.clone().unwrap_or_default();
            self.ask_password(
                mode,
                msg,
                format!("{name}, you entered an invalid password. Try again!"),
            )
            .await;
            return Flow::Continue;
        }
        self.scratch.password = Some(password);

        match mode {
            Mode::Register => self.commit_register(msg).await,
            Mode::Login => self.commit_login(msg).await,
        }
    }

    async fn commit_register(&mut self, msg: &InboundMessage) -> Flow {
        let (Some(username), Some(country), Some(offset), Some(password)) = (
            self.scratch.username.clone(),
            self.scratch.country.clone(),
            self.scratch.offset,
            self.scratch.password.clone(),
        ) else {
            error!(chat_id = self.chat_id.0, "register commit with incomplete scratch state");
            return Flow::Continue;
        };

        let outcome = match self.auth.register(&username, &password, &country, offset).await {
            Ok(v) => v,
            Err(e) => {
                error!(chat_id = self.chat_id.0, %username, "register failed: {e}");
                return Flow::Continue;
            }
        };

        match outcome {
            CreateOutcome::Duplicate => {
                debug!(chat_id = self.chat_id.0, %username, "username already taken");
                self.prompt(
                    Mode::Register,
                    Step::Username,
                    msg,
                    format!("Username {username} already exists. Try again! Enter your username"),
                    None,
                )
                .await;
                Flow::Continue
            }
            CreateOutcome::Created => {
                info!(chat_id = self.chat_id.0, %username, "user registered");
                self.finish(
                    msg,
                    username.clone(),
                    offset,
                    format!("Thank you, {username}! You have successfully registered"),
                )
                .await
            }
        }
    }

    async fn commit_login(&mut self, msg: &InboundMessage) -> Flow {
        let (Some(username), Some(password)) =
            (self.scratch.username.clone(), self.scratch.password.clone())
        else {
            error!(chat_id = self.chat_id.0, "login commit with incomplete scratch state");
            return Flow::Continue;
        };

        let outcome = match self.auth.login(&username, &password).await {
            Ok(v) => v,
            Err(e) => {
                error!(chat_id = self.chat_id.0, %username, "login failed: {e}");
                return Flow::Continue;
            }
        };

        match outcome {
            LoginOutcome::Authorized(user) => {
                info!(chat_id = self.chat_id.0, %username, "user logged in");
                self.finish(
                    msg,
                    user.username.clone(),
                    user.offset,
                    format!("{}, you are logged in!", user.username),
                )
                .await
            }
            rejected @ (LoginOutcome::NotFound | LoginOutcome::WrongPassword) => {
                debug!(chat_id = self.chat_id.0, %username, ?rejected, "login rejected");
                self.scratch.password = None;
                self.prompt(
                    Mode::Login,
                    Step::Username,
                    msg,
                    "Invalid username or password. Try again! Enter your username".to_string(),
                    None,
                )
                .await;
                Flow::Continue
            }
        }
    }

    async fn finish(
        &mut self,
        msg: &InboundMessage,
        username: String,
        offset: UtcOffset,
        greeting: String,
    ) -> Flow {
        let completion = Completion {
            username,
            chat_id: self.chat_id,
            sender: msg.sender.clone(),
            offset,
        };
        if self.completions.send(completion).is_err() {
            warn!(chat_id = self.chat_id.0, "router is gone, dropping completion");
        }

        let subscribe = format!(
            "If you want to receive reports, send the \"/start\" command to these bots\n\n\
             Daily reports:\n{}\n\
             Monthly reports:\n{}\n\n\
             Those bots only deliver reports. Everything else happens in this chat.",
            self.reporters.daily, self.reporters.monthly
        );
        for text in [greeting, subscribe, HOW_TO_RECORD.to_string()] {
            let out = OutgoingMessage::reply(msg, text).with_keyboard(Keyboard::Remove);
            if let Err(e) = self.messenger.send(out).await {
                warn!(chat_id = self.chat_id.0, "failed to send onboarding message: {e}");
            }
        }
        Flow::Stop
    }

    /// Whether `msg` answers the outstanding prompt.
    ///
    /// An answer replies to the prompt, or is the very next message in the
    /// chat when the client dropped the reply link.
    fn answers(pending: &Pending, msg: &InboundMessage) -> bool {
        if msg.is_command() {
            return false;
        }
        match msg.reply_to {
            Some(to) => to == pending.prompt,
            None => pending.prompt.0.checked_add(1) == Some(msg.message_id.0),
        }
    }
}

#[async_trait]
impl ChatActor for OnboardingActor {
    fn kind(&self) -> &'static str {
        "onboarding"
    }

    async fn handle(&mut self, msg: InboundMessage) -> Flow {
        if msg.is_command_named(CMD_REGISTER) {
            self.start(Mode::Register, &msg).await;
            return Flow::Continue;
        }
        if msg.is_command_named(CMD_LOGIN) {
            self.start(Mode::Login, &msg).await;
            return Flow::Continue;
        }

        let Some(pending) = self.pending else {
            debug!(chat_id = self.chat_id.0, "no prompt outstanding, ignoring message");
            return Flow::Continue;
        };
        if !Self::answers(&pending, &msg) {
            debug!(chat_id = self.chat_id.0, "message does not answer the prompt, ignoring");
            return Flow::Continue;
        }

        match pending.step {
            Step::Username => self.on_username(pending.mode, &msg).await,
            Step::Country => self.on_country(&msg).await,
            Step::Password => self.on_password(pending.mode, &msg).await,
        }
    }
}

pub fn valid_username(s: &str) -> bool {
    let n = s.chars().count();
    (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&n)
}

pub fn valid_password(s: &str) -> bool {
    let n = s.chars().count();
    n > 0 && n <= PASSWORD_MAX_LEN
}

/// Parse a label like `Sri Lanka (UTC+5:30)` into `("Sri Lanka", +05:30)`.
pub fn parse_country_label(label: &str) -> Option<(String, UtcOffset)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^\s*([^(]+?)\s*\((?:UTC|GMT)\s*([+-])(\d{1,2})(?:[:.](\d{2}))?\)\s*$")
            .expect("valid regex")
    });

    let caps = re.captures(label)?;
    let country = caps
        .get(1)?
        .as_str()
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if country.is_empty() {
        return None;
    }
    let sign = if &caps[2] == "-" { -1 } else { 1 };
    let hours: u32 = caps[3].parse().ok()?;
    let minutes: u32 = match caps.get(4) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let offset = UtcOffset::from_hm(sign, hours, minutes)?;
    Some((country, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{hash_password, MemoryUserStore, User, UserStore},
        test_support::{inbound, reply, FakeMessenger},
    };
    use std::time::Duration;

    struct Harness {
        actor: OnboardingActor,
        messenger: Arc<FakeMessenger>,
        store: Arc<MemoryUserStore>,
        completions: mpsc::UnboundedReceiver<Completion>,
        next_msg: i32,
    }

    impl Harness {
        fn new() -> Self {
            let messenger = Arc::new(FakeMessenger::default());
            let store = Arc::new(MemoryUserStore::new());
            let (tx, rx) = mpsc::unbounded_channel();
            let actor = OnboardingActor::new(
                ChatId(7),
                Authenticator::new(store.clone(), "pepper", Duration::from_secs(1)),
                messenger.clone(),
                ReporterNames {
                    daily: "@daily".to_string(),
                    monthly: "@monthly".to_string(),
                },
                tx,
            );
            Self {
                actor,
                messenger,
                store,
                completions: rx,
                next_msg: 1,
            }
        }

        async fn command(&mut self, text: &str) -> Flow {
            let id = self.bump();
            self.actor.handle(inbound(7, id, text)).await
        }

        /// Reply to the most recent prompt.
        async fn answer(&mut self, text: &str) -> Flow {
            let id = self.bump();
            let prompt = self.actor.pending.map(|p| p.prompt).unwrap_or(MessageId(0));
            self.actor.handle(reply(7, id, prompt, text)).await
        }

        fn bump(&mut self) -> i32 {
            self.next_msg += 1;
            self.next_msg
        }

        fn step(&self) -> Option<(Mode, Step)> {
            self.actor.pending.map(|p| (p.mode, p.step))
        }
    }

    #[test]
    fn parses_country_labels_with_fractional_offsets() {
        let (country, offset) = parse_country_label("Sri Lanka (UTC+5:30)").unwrap();
        assert_eq!(country, "Sri Lanka");
        assert_eq!(offset.minutes(), 330);

        let (country, offset) = parse_country_label("USA, California (UTC-7)").unwrap();
        assert_eq!(country, "USA");
        assert_eq!(offset.minutes(), -420);

        let (_, offset) = parse_country_label("Sri Lanka (GMT+5.30)").unwrap();
        assert_eq!(offset.minutes(), 330);
    }

    #[test]
    fn rejects_malformed_country_labels() {
        assert!(parse_country_label("Belarus").is_none());
        assert!(parse_country_label("(UTC+3)").is_none());
        assert!(parse_country_label("Mars (UTC+13)").is_none());
        assert!(parse_country_label("Atlantis (UTC+3:75)").is_none());
    }

    #[test]
    fn every_offered_country_parses() {
        for label in COUNTRIES {
            assert!(parse_country_label(label).is_some(), "{label}");
        }
    }

    #[test]
    fn username_and_password_bounds() {
        assert!(!valid_username("ab"));
        assert!(valid_username("abc"));
        assert!(valid_username("abcdefghijklmno"));
        assert!(!valid_username("abcdefghijklmnop"));
        assert!(valid_password("123456789012345"));
        assert!(!valid_password("1234567890123456"));
        assert!(!valid_password(""));
    }

    #[tokio::test]
    async fn register_walks_username_country_password() {
        let mut h = Harness::new();
        assert_eq!(h.command("/register").await, Flow::Continue);
        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));

        h.answer("dima").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Country)));
        assert!(matches!(
            h.messenger.last().unwrap().keyboard,
            Some(Keyboard::Options(_))
        ));

        h.answer("Sri Lanka (UTC+5:30)").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Password)));
        assert_eq!(h.messenger.last().unwrap().keyboard, Some(Keyboard::Remove));

        assert_eq!(h.answer("secret").await, Flow::Stop);
        let done = h.completions.try_recv().unwrap();
        assert_eq!(done.username, "dima");
        assert_eq!(done.chat_id, ChatId(7));
        assert_eq!(done.offset.minutes(), 330);

        let stored = h.store.get_user("dima").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, hash_password("pepper", "secret"));
        assert_eq!(stored.country, "Sri Lanka");
        assert!(h.messenger.texts().iter().any(|t| t.contains("@daily")));
    }

    #[tokio::test]
    async fn invalid_inputs_reprompt_without_advancing() {
        let mut h = Harness::new();
        h.command("/register").await;

        h.answer("ab").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));

        h.answer("dima").await;
        h.answer("somewhere nice").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Country)));

        h.answer("Poland (UTC+2)").await;
        h.answer("this password is far too long").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Password)));
        assert!(h.completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn unrelated_messages_are_ignored() {
        let mut h = Harness::new();
        h.command("/register").await;
        let prompt = h.actor.pending.unwrap().prompt;

        // A reply to some other message does not answer the prompt.
        h.actor.handle(reply(7, 50, MessageId(3), "dima")).await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));
        assert_eq!(h.actor.pending.unwrap().prompt, prompt);

        // Neither does a message older than the prompt.
        h.actor.handle(inbound(7, 1, "dima")).await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));

        // Nor a later message that is not adjacent to it.
        h.actor.handle(inbound(7, prompt.0 + 2, "dima")).await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));
    }

    #[tokio::test]
    async fn message_right_after_the_prompt_answers_it() {
        let mut h = Harness::new();
        h.command("/register").await;
        let prompt = h.actor.pending.unwrap().prompt;

        h.actor.handle(inbound(7, prompt.0 + 1, "dima")).await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Country)));
    }

    #[tokio::test]
    async fn duplicate_username_returns_to_username_entry() {
        let mut h = Harness::new();
        let existing = User {
            username: "dima".to_string(),
            password_hash: hash_password("pepper", "original"),
            country: "Belarus".to_string(),
            offset: UtcOffset::from_hm(1, 3, 0).unwrap(),
        };
        h.store.create_user(existing.clone()).await.unwrap();

        h.command("/register").await;
        h.answer("dima").await;
        h.answer("Poland (UTC+2)").await;
        assert_eq!(h.answer("secret").await, Flow::Continue);

        assert_eq!(h.step(), Some((Mode::Register, Step::Username)));
        assert!(h.messenger.last().unwrap().text.contains("already exists"));
        assert_eq!(h.store.get_user("dima").await.unwrap().unwrap(), existing);

        // A fresh username completes with the country and password already given.
        assert_eq!(h.answer("dima2").await, Flow::Stop);
        let done = h.completions.try_recv().unwrap();
        assert_eq!(done.username, "dima2");
        assert_eq!(done.offset.minutes(), 120);
    }

    #[tokio::test]
    async fn login_failures_share_one_message_and_restart_at_username() {
        let mut h = Harness::new();
        h.store
            .create_user(User {
                username: "liza".to_string(),
                password_hash: hash_password("pepper", "right"),
                country: "USA".to_string(),
                offset: UtcOffset::from_hm(-1, 7, 0).unwrap(),
            })
            .await
            .unwrap();

        h.command("/login").await;
        h.answer("ghost").await;
        assert_eq!(h.step(), Some((Mode::Login, Step::Password)));
        h.answer("right").await;
        let not_found = h.messenger.last().unwrap().text;
        assert_eq!(h.step(), Some((Mode::Login, Step::Username)));

        h.answer("liza").await;
        assert_eq!(h.answer("wrong").await, Flow::Continue);
        let wrong_password = h.messenger.last().unwrap().text;
        assert_eq!(h.step(), Some((Mode::Login, Step::Username)));
        assert_eq!(not_found, wrong_password);
        assert!(h.completions.try_recv().is_err());

        h.answer("liza").await;
        assert_eq!(h.answer("right").await, Flow::Stop);
        let done = h.completions.try_recv().unwrap();
        assert_eq!(done.offset.minutes(), -420);
    }

    #[tokio::test]
    async fn transport_failure_keeps_previous_prompt_outstanding() {
        let mut h = Harness::new();
        h.command("/register").await;
        let before = h.actor.pending.unwrap();

        h.messenger.set_failing(true);
        h.answer("dima").await;
        assert_eq!(h.actor.pending.unwrap(), before);
        assert!(h.actor.scratch.username.is_none());

        h.messenger.set_failing(false);
        h.answer("dima").await;
        assert_eq!(h.step(), Some((Mode::Register, Step::Country)));
    }

    #[tokio::test]
    async fn repeated_command_restarts_the_flow() {
        let mut h = Harness::new();
        h.command("/register").await;
        h.answer("dima").await;
        h.command("/login").await;
        assert_eq!(h.step(), Some((Mode::Login, Step::Username)));
        assert!(h.actor.scratch.username.is_none());
    }
}
