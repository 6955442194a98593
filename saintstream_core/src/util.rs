//! Fixed assistant strings.

/// Persona and formatting directives prepended to every request.
pub const SYSTEM_PROMPT: &str = "You are the SaintStream assistant. Help the user find a movie. \
Keep it sleek and cool. Answer in a few short sentences, wrap movie titles in **bold**, \
and use a short bulleted list when suggesting more than one movie.";

/// Final content of an assistant message whose generation failed.
pub const APOLOGY_MESSAGE: &str =
    "Sorry, I couldn't reach the movie assistant right now. Please try again in a moment.";

/// Suffix appended to an assistant message whose generation was stopped.
pub const INTERRUPTED_MARKER: &str = " [interrupted]";
