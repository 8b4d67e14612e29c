//! System prompts for every model-backed stage (4.B consumers).
//!
//! Centralising every prompt here serves the same two purposes the teacher's
//! original module served: a single place to tune wording, and a place unit
//! tests can inspect without a live model call.
//!
//! The per-[`ElementKind`](crate::types::ElementKind) prompts are grounded in
//! `content_parser.py::_get_prompts_for_element_type` — five distinct
//! instructions rather than one generic "convert this page" prompt, because
//! tables, code, algorithms, and tables of contents each break a generic
//! transcription prompt in a different way (tables lose alignment, code gets
//! wrapped in no fence or the wrong one, algorithms drift out of LaTeX,
//! tables of contents get reformatted as running prose).

use crate::types::ElementKind;

/// The element kinds that need a specialised prompt; everything else falls
/// through to [`default_content_prompt`].
pub fn content_prompt_for(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Table => table_prompt(),
        ElementKind::CodeBlock => code_block_prompt(),
        ElementKind::Algorithm => algorithm_prompt(),
        ElementKind::Toc => toc_prompt(),
        _ => default_content_prompt(),
    }
}

/// General-purpose transcription prompt used for text, titles, abstracts,
/// references, footnotes, aside text, and anything else without a
/// specialised prompt below.
pub fn default_content_prompt() -> &'static str {
    r#"You are transcribing one region cropped from a scanned document page into Markdown.

Transcribe the text exactly as it appears, preserving reading order, paragraph breaks, emphasis (bold/italic), and list structure.

Mathematical notation:
- Wrap inline formulas in single dollar signs: $x^2 + y^2 = z^2$
- Wrap standalone/display formulas in double dollar signs: $$\sum_{i=1}^n i$$
- If an equation carries a number in the source, reproduce it with \tag{}, e.g. $$E = mc^2 \tag{1}$$
- Never approximate a formula with plain text or an image description; always render it as LaTeX.

Output rules:
- Output the transcribed Markdown only, nothing else.
- Do not wrap your answer in a ```markdown code fence or any other code fence.
- Do not add commentary, labels, or a restatement of these instructions."#
}

/// Table-specific prompt: multi-level headers, merged cells, and alignment
/// are exactly the things a generic transcription prompt gets wrong.
pub fn table_prompt() -> &'static str {
    r#"You are transcribing a table cropped from a scanned document page into GitHub-Flavored Markdown.

Rules:
- Preserve every row and column, including multi-level headers — flatten a two-row header into one row by joining the levels with a line break (`<br>`) inside the cell if Markdown's single header row can't otherwise represent it.
- When cells are merged across columns or rows, repeat the merged value in each cell it visually spans rather than leaving cells blank, so the table still reads correctly as a flat grid.
- Add alignment markers in the header separator row (`:---`, `:---:`, `---:`) that match the visual alignment of each column.
- If the table is too irregular for pipe-table syntax (nested tables, spanning cells Markdown cannot express), fall back to an HTML `<table>` instead of forcing it into a broken pipe table.

Output rules:
- Output the table only, nothing else.
- Do not wrap your answer in a ```markdown code fence or any other code fence.
- Do not add commentary, a caption, or a restatement of these instructions."#
}

/// Code blocks are the one element kind where a fence is the *correct*
/// output — the opposite of every other prompt's anti-fence rule.
pub fn code_block_prompt() -> &'static str {
    r#"You are transcribing a block of source code cropped from a scanned document page.

Rules:
- Reproduce the code exactly, including indentation, punctuation, and line breaks.
- Identify the programming language from syntax and context, and wrap the code in a fenced code block tagged with that language, e.g. ```python ... ```.
- If the language cannot be determined with confidence, use a fence with no language tag rather than guessing.

Output rules:
- Output the fenced code block only, nothing else.
- Do not add commentary or a restatement of these instructions."#
}

/// Algorithms are transcribed as LaTeX, not as code — they are typeset with
/// line numbers, indentation via `\textbf{for}`/`\textbf{if}`, etc. in the
/// source, and forcing them through the code-block prompt loses that.
pub fn algorithm_prompt() -> &'static str {
    r#"You are transcribing a pseudocode/algorithm block cropped from a scanned document page.

Rules:
- Transcribe the entire algorithm as a single LaTeX `aligned` environment, wrapped in display math dollar signs, e.g.:

$$\begin{aligned}
&\textbf{Algorithm 1: } \text{Example} \\
&\textbf{Input: } x \\
&1:\ \textbf{for } i = 1 \text{ to } n \textbf{ do} \\
&2:\ \quad x \gets x + 1 \\
&3:\ \textbf{end for} \\
&\textbf{Output: } x
\end{aligned}$$

- Preserve line numbers, indentation (via `\quad`), and control-flow keywords (`\textbf{for}`, `\textbf{if}`, `\textbf{while}`, `\textbf{return}`) exactly as shown.
- Keep every line inside the same `aligned` block; do not split the algorithm across multiple formulas.

Output rules:
- Output the LaTeX block only, nothing else.
- Do not wrap your answer in a ```markdown code fence.
- Do not add commentary or a restatement of these instructions."#
}

/// Tables of contents read as plain hierarchical text, not a Markdown table
/// — forcing pipe-table syntax on dotted leaders and page numbers produces
/// garbage.
pub fn toc_prompt() -> &'static str {
    r#"You are transcribing a table of contents cropped from a scanned document page.

Rules:
- Reproduce each entry's title and page number as plain text, one entry per line.
- Preserve the hierarchy (chapter/section/subsection) using indentation, matching how the entries are indented in the source.
- Example:

Chapter 1 Introduction ........................ 1
  1.1 Background ............................. 3
  1.2 Related Work ........................... 7
Chapter 2 Methods ............................ 15

Output rules:
- Output the transcribed entries only, nothing else.
- Do not wrap your answer in a ```markdown code fence.
- Do not add commentary or a restatement of these instructions."#
}

/// Heading-Level Analyzer (4.J): one batched call over every document/paragraph
/// title on the page in document order, asking for a semantic level per
/// heading rather than trusting the layout detector's raw category.
pub fn heading_level_system_prompt() -> &'static str {
    r#"You are assigning semantic heading levels to a list of headings extracted from a document, in document order.

For each heading, decide its true semantic level in the document's outline:
- Level 1: the document's main title (usually at most one per document).
- Level 2: a top-level chapter or section heading.
- Level 3: a subsection heading.
- Level 4: a minor/run-in heading.
- Level 5: a deeper nested subsection heading.
- Level 6: the deepest nested subsection heading.
- Level 0: this is not actually a heading (e.g. a caption or running header misclassified by the layout model) and should be demoted to body text.

You will be given a numbered list of heading texts. Respond with one line per heading, in the exact form:

<number>: <level>

where <number> matches the input numbering and <level> is one of 0, 1, 2, 3, 4, 5, 6. Output nothing else — no explanation, no repeated heading text."#
}

/// Translator (4.K): batched translation prompt, grounded in the reference's
/// instruction to preserve LaTeX/code verbatim rather than translating it.
pub fn translator_system_prompt(target_language: &str) -> String {
    format!(
        r#"You are translating Markdown document content into {target_language}.

You will receive several content blocks, each wrapped as:

<content id="N">
...original Markdown...
</content>

Rules:
- Translate the natural-language text of each block into {target_language}.
- Never translate or alter Markdown syntax, LaTeX formulas (anything between `$`/`$$` delimiters), code blocks, table pipe/alignment syntax, or HTML tags — copy those through exactly as written.
- Preserve the original block's structure (headings stay headings, list items stay list items, table rows stay table rows).

Respond with exactly one `<translated id="N">...</translated>` block per input `<content>` block, in the same order, with matching `id` values. Output nothing else."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_prompt_forbids_code_fences() {
        assert!(table_prompt().contains("Do not wrap"));
    }

    #[test]
    fn code_block_prompt_requires_a_fence() {
        assert!(code_block_prompt().contains("```"));
    }

    #[test]
    fn content_prompt_for_dispatches_by_kind() {
        assert_eq!(content_prompt_for(ElementKind::Table), table_prompt());
        assert_eq!(content_prompt_for(ElementKind::CodeBlock), code_block_prompt());
        assert_eq!(content_prompt_for(ElementKind::Algorithm), algorithm_prompt());
        assert_eq!(content_prompt_for(ElementKind::Toc), toc_prompt());
        assert_eq!(content_prompt_for(ElementKind::Text), default_content_prompt());
    }

    #[test]
    fn translator_prompt_embeds_target_language() {
        assert!(translator_system_prompt("French").contains("French"));
    }
}
