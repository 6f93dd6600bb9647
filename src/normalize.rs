//! Limpieza del texto devuelto por el LLM: elimina el marcado tipo markdown
//! (cabeceras, énfasis, código, enlaces, listas) y normaliza los párrafos.

use once_cell::sync::Lazy;
use regex::Regex;

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"##\s*(.*?)\n").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.*?)`").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s").unwrap());
// Consume de una vez los marcadores encadenados ("1. 2. 3. x").
static ORDERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:\d+\.\s)+").unwrap());

/// Convierte la salida del modelo en texto plano para mostrar.
///
/// Las reglas se aplican en orden (ver `normalize_once`) y se repiten hasta
/// que el texto deja de cambiar, de modo que `normalize(normalize(x)) == normalize(x)`.
/// Una entrada vacía o sólo con espacios devuelve una cadena vacía.
pub fn normalize(raw: &str) -> String {
    // Termina: cada pasada que cambia algo tras la primera elimina al menos un
    // carácter de marcado, y ninguna regla los introduce.
    let mut current = normalize_once(raw);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(raw: &str) -> String {
    // El orden importa: las reglas posteriores asumen que las anteriores ya se aplicaron.
    let text = HEADING.replace_all(raw, "$1:\n");
    let text = BOLD.replace_all(&text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = BULLET.replace_all(&text, "• ");
    let text = ORDERED.replace_all(&text, "");

    text.split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_become_labels() {
        assert_eq!(normalize("## Resumen\nTexto"), "Resumen:\n\nTexto");
    }

    #[test]
    fn emphasis_and_code_are_stripped() {
        assert_eq!(
            normalize("**Importante**: el *arrendatario* paga `IVA`"),
            "Importante: el arrendatario paga IVA"
        );
    }

    #[test]
    fn links_keep_only_label() {
        assert_eq!(
            normalize("Ver [la ley](https://boe.es/ley) aplicable"),
            "Ver la ley aplicable"
        );
    }

    #[test]
    fn list_markers_are_rewritten() {
        let raw = "- primero\n* segundo\n+ tercero\n1. uno\n2. dos";
        assert_eq!(
            normalize(raw),
            "• primero\n\n• segundo\n\n• tercero\n\nuno\n\ndos"
        );
    }

    #[test]
    fn blank_lines_collapse_to_single_paragraph_break() {
        assert_eq!(normalize("a\n\n\n   \nb\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \n\t\n "), "");
    }

    #[test]
    fn deeply_chained_ordered_markers_are_fully_removed() {
        let raw = "1. ".repeat(10) + "x";
        let once = normalize(&raw);
        assert_eq!(once, "x");
        assert_eq!(normalize(&once), once);

        let raw = "3. ".repeat(40) + "cláusula\n" + &"1. ".repeat(12) + "anexo";
        assert_eq!(normalize(&raw), "cláusula\n\nanexo");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "## Título\n**Tipo:** *x*\n\n- a\n1. b",
            "1. 2. anidado\n- - doble viñeta",
            "1. - mezcla\n`code` y [enlace](http://x)",
            "Type: Gender Bias\nText: \"he will decide\"\nConfidence: 82%",
            "",
            "texto plano sin marcas",
            "- 1. - 1. - 1. - 1. - 1. - 1. - 1. - 1. - 1. x",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "no idempotente para {sample:?}");
        }
    }
}
