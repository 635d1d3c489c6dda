use crate::core::state::{DEFAULT_GENRE, DEFAULT_STYLE};

/// Known author styles and the voice each one asks the model to write in.
pub const STYLES: &[(&str, &str)] = &[
    (
        "Douglas Adams",
        "Absurd, ironic, cosmic. British understatement, technological absurdities and the realisation that the universe is a strange place.",
    ),
    (
        "Ernest Hemingway",
        "Minimalist, terse, precise. Short sentences, no needless adjectives. The weight lies in what goes unsaid (the iceberg theory).",
    ),
    (
        "Edgar Allan Poe",
        "Gothic, dark, eerie. Dense atmosphere, psychological dread, shadows and melancholy.",
    ),
    (
        "Virginia Woolf",
        "Poetic, image-rich, flowing. Stream of consciousness, fleeting impressions, the quality of light and moments stretched thin.",
    ),
    (
        "Charles Bukowski",
        "Sarcastic, biting, honest. Dirty realism, direct and unsentimental, a little dented. The naked truth without a filter.",
    ),
    (
        "Franz Kafka",
        "Surreal, dreamlike, enigmatic. Nightmare logic in a matter-of-fact tone. The impossible is treated as entirely normal and bureaucratic.",
    ),
    (
        "Hunter S. Thompson",
        "Gonzo, wild, subjective. A feverish pace, radical subjectivity and aggressive, energetic word choice.",
    ),
    (
        "Roald Dahl",
        "Macabre, funny, unpredictable. Childlike curiosity meets black humour. Odd twists and a gleeful wink.",
    ),
];

/// Known genres and how each one should feel.
pub const GENRES: &[(&str, &str)] = &[
    (
        "Sci-Fi",
        "Technoid, philosophical, glitchy. The friction between people and technology. No laser battles, but existential questions in a technologised world.",
    ),
    (
        "Fantasy",
        "Magical realism, strange, archaic. The supernatural seeps quietly into everyday life. No stock dragons, but inexplicable phenomena and dark myths.",
    ),
    (
        "Crime",
        "Psychological, analytical, deconstructive. Less about who did it than why. Motives, abysses and clues hidden in the mundane.",
    ),
    (
        "Adventure",
        "Existential, physical, boundary-pushing. A journey that takes the character to their limits through surroundings that are hostile, beautiful and unpredictable.",
    ),
    (
        "Realism",
        "Gritty, hyper-focused, honest. Everyday life without polish. Sounds, smells and the small tragedies between the coffee machine and the front door.",
    ),
    (
        "Horror",
        "Psychological, uncanny, oppressive. The fear grows in the mind as the familiar slowly turns strange. Atmosphere and what stays unseen.",
    ),
    (
        "Dystopia",
        "Bureaucratic, decaying, critical of the system. A world whose rules work against the individual. Isolation, decay and the absurd fight against the machine.",
    ),
    (
        "Satire",
        "Biting, revealing, meta. Society dissected through exaggeration. Double standards, absurdity and the madness of the normal.",
    ),
];

fn lookup<'a>(table: &'a [(&'a str, &'a str)], key: &str, fallback: &str) -> (&'a str, &'a str) {
    let find = |k: &str| table.iter().find(|(name, _)| name.eq_ignore_ascii_case(k.trim()));
    find(key)
        .or_else(|| find(fallback))
        .copied()
        .unwrap_or(("", ""))
}

/// Style description for `style`, falling back to the default author.
pub fn style_description(style: &str) -> String {
    let (name, desc) = lookup(STYLES, style, DEFAULT_STYLE);
    format!("{} ({})", name, desc)
}

/// Genre description for `genre`, falling back to the default genre.
pub fn genre_description(genre: &str) -> String {
    let (name, desc) = lookup(GENRES, genre, DEFAULT_GENRE);
    format!("{} ({})", name, desc)
}

pub fn style_names() -> Vec<&'static str> {
    STYLES.iter().map(|(name, _)| *name).collect()
}

pub fn genre_names() -> Vec<&'static str> {
    GENRES.iter().map(|(name, _)| *name).collect()
}

/// Inputs shared by every prompt of one story.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub idea: &'a str,
    pub genre: &'a str,
    pub style: &'a str,
    pub characters: &'a [String],
    pub language: &'a str,
}

impl PromptContext<'_> {
    fn parameters(&self) -> String {
        let mut out = format!(
            "Genre: {}\nStyle: {}\nPremise: {}",
            genre_description(self.genre),
            style_description(self.style),
            self.idea.trim()
        );
        if !self.characters.is_empty() {
            out.push_str(&format!("\nMain characters: {}", self.characters.join(", ")));
        }
        out
    }
}

pub fn system_prompt(language: &str) -> String {
    format!(
        "You are an award-winning short story author with a distaste for cliché. \
         You write literary fiction meant to be read aloud. Write in {}. \
         Never add morals, summaries or meta commentary.",
        language
    )
}

const CRAFT_RULES: &str = "\
Pacing: do not rush the plot. Let scenes unfold slowly and describe textures, smells and surroundings precisely enough to paint pictures in the listener's head.
Literary standard: keep strictly to the chosen author style. Avoid stock phrases, lecturing and moral summaries. The story ends on its last narrative moment.
Show, don't tell: reveal how characters feel through their actions and reactions.
The text will be narrated by a single voice: no headings, lists, markdown or stage directions.";

/// Prompt for a complete story in one call.
pub fn single_pass_prompt(ctx: &PromptContext<'_>, target_minutes: u32, target_words: u32) -> String {
    format!(
        "Write a complete, self-contained short story in a single pass.\n\n\
         Parameters:\n{params}\n\n\
         Length: the story must read aloud in about {minutes} minutes. Target word count: {words} words. \
         Do not speed up to fit in more plot. For longer targets, stretch the scenes and give dialogue room; \
         for shorter ones, stay focused.\n\
         Write it as one flowing text with scene breaks only, no numbered chapters.\n\n\
         {rules}\n\n\
         Respond ONLY with a JSON object of this shape:\n\
         {{\n  \"title\": \"A creative, literary title\",\n  \"synopsis\": \"A gripping summary in 3-4 sentences.\",\n  \"full_text\": \"The complete story text...\"\n}}",
        params = ctx.parameters(),
        minutes = target_minutes,
        words = target_words,
        rules = CRAFT_RULES,
    )
}

/// Prompt for the outline of a story told across `segment_count` parts.
pub fn outline_prompt(ctx: &PromptContext<'_>, target_minutes: u32, segment_count: usize) -> String {
    format!(
        "Plan a story that will be narrated over about {minutes} minutes in exactly {count} consecutive parts.\n\n\
         Parameters:\n{params}\n\n\
         Each part needs a short title and a brief of 2-4 sentences describing what happens in it. \
         Together the parts must form one arc with a real ending.\n\n\
         Respond ONLY with a JSON object of this shape:\n\
         {{\n  \"title\": \"A creative, literary title\",\n  \"synopsis\": \"A gripping summary in 3-4 sentences.\",\n  \"segments\": [{{\"title\": \"...\", \"brief\": \"...\"}}]\n}}",
        minutes = target_minutes,
        count = segment_count,
        params = ctx.parameters(),
    )
}

/// Prompt for one part of a segmented story. `previous_tail` is the end of
/// the text written so far, empty for the first part.
#[allow(clippy::too_many_arguments)]
pub fn segment_prompt(
    ctx: &PromptContext<'_>,
    story_title: &str,
    synopsis: &str,
    index: usize,
    total: usize,
    segment_title: &str,
    brief: &str,
    target_words: u32,
    previous_tail: &str,
) -> String {
    let mut prompt = format!(
        "You are writing part {part} of {total} of the story \"{title}\".\n\n\
         Parameters:\n{params}\n\n\
         Synopsis of the whole story: {synopsis}\n\n\
         This part: \"{segment_title}\". {brief}\n\
         Length: about {words} words.\n",
        part = index + 1,
        total = total,
        title = story_title,
        params = ctx.parameters(),
        synopsis = synopsis,
        segment_title = segment_title,
        brief = brief,
        words = target_words,
    );
    if previous_tail.is_empty() {
        prompt.push_str("This is the opening of the story.\n");
    } else {
        prompt.push_str(&format!(
            "\nThe story so far ends like this:\n\"\"\"\n{}\n\"\"\"\nContinue seamlessly from there without repeating it.\n",
            previous_tail
        ));
    }
    if index + 1 == total {
        prompt.push_str("This is the final part: bring the story to its ending.\n");
    }
    prompt.push('\n');
    prompt.push_str(CRAFT_RULES);
    prompt.push_str("\n\nRespond with the narrative text of this part only, no title line.");
    prompt
}
