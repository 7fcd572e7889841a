//! Language display colors, matching GitHub's linguist palette.

pub const DEFAULT_LANGUAGE_COLOR: &str = "#cccccc";

static LANGUAGE_COLORS: &[(&str, &str)] = &[
    ("Assembly", "#6E4C13"),
    ("Astro", "#ff5a03"),
    ("Batchfile", "#C1F12E"),
    ("C", "#555555"),
    ("C#", "#178600"),
    ("C++", "#f34b7d"),
    ("CMake", "#DA3434"),
    ("CSS", "#563d7c"),
    ("Clojure", "#db5855"),
    ("Dart", "#00B4AB"),
    ("Dockerfile", "#384d54"),
    ("Elixir", "#6e4a7e"),
    ("Erlang", "#B83998"),
    ("F#", "#b845fc"),
    ("Go", "#00ADD8"),
    ("HTML", "#e34c26"),
    ("Haskell", "#5e5086"),
    ("Java", "#b07219"),
    ("JavaScript", "#f1e05a"),
    ("Julia", "#a270ba"),
    ("Jupyter Notebook", "#DA5B0B"),
    ("Kotlin", "#A97BFF"),
    ("Lua", "#000080"),
    ("MDX", "#fcb32c"),
    ("Makefile", "#427819"),
    ("Markdown", "#083fa1"),
    ("Nix", "#7e7eff"),
    ("OCaml", "#ef7a08"),
    ("Objective-C", "#438eff"),
    ("PHP", "#4F5D95"),
    ("Perl", "#0298c3"),
    ("PowerShell", "#012456"),
    ("Python", "#3572A5"),
    ("R", "#198CE7"),
    ("Ruby", "#701516"),
    ("Rust", "#dea584"),
    ("SCSS", "#c6538c"),
    ("Scala", "#c22d40"),
    ("Shell", "#89e051"),
    ("Svelte", "#ff3e00"),
    ("Swift", "#F05138"),
    ("TeX", "#3D6117"),
    ("TypeScript", "#3178c6"),
    ("Vim Script", "#199f4b"),
    ("Vue", "#41b883"),
    ("Zig", "#ec915c"),
];

/// Look up the display color for a primary language. Unknown or missing
/// languages get the fallback color, never an error.
pub fn language_color(language: &str) -> &'static str {
    LANGUAGE_COLORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(language))
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_LANGUAGE_COLOR)
}
