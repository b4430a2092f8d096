//! Locale catalog for every user-facing message.
//!
//! Six locales ship: `en`, `es`, `fr`, `de`, `it`, `pt-BR`. Lookups fall
//! back to English for an unknown locale, then to the key itself for an
//! unknown key. Templates use `{name}` placeholders; placeholders with no
//! matching argument are left in place.

/// Supported locales, in display order.
pub const SUPPORTED_LOCALES: &[&str] = &["en", "es", "fr", "de", "it", "pt-BR"];

pub const DEFAULT_LOCALE: &str = "en";

const ALIASES: &[(&str, &str)] = &[
    ("en", "en"),
    ("en-us", "en"),
    ("es", "es"),
    ("es-es", "es"),
    ("fr", "fr"),
    ("fr-fr", "fr"),
    ("de", "de"),
    ("de-de", "de"),
    ("it", "it"),
    ("it-it", "it"),
    ("pt", "pt-BR"),
    ("pt-br", "pt-BR"),
];

const LOCALE_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt-BR", "Portuguese (Brazil)"),
];

type Catalog = &'static [(&'static str, &'static str)];

const EN: Catalog = &[
    ("paused", "Paused. Type 'resume' or /menu to continue."),
    ("resumed", "Resumed. I will keep searching."),
    ("status", "Searching for {search_term} in {target_city}."),
    (
        "config_confirmed",
        "Configuration confirmed.\n\nMode: {persona}\nSearch: {search_term}\nCity: {target_city}\nMax price: {price_max}\n\nI am searching now and will notify you when I find matches.",
    ),
    ("ai_ready", "Great. I will start searching now."),
    ("ai_missing_fields", "I need the product, max price, and city."),
    ("ai_fallback_starting", "Got it. I am starting the search."),
    (
        "ai_fallback_prompt",
        "Tell me the product, the maximum price, and the city. Example: 'PlayStation 5 up to 2500 in Sao Paulo'.",
    ),
    ("offer_default_title", "Listing"),
    ("offer_found", "FOUND:"),
    ("offer_source", "Source: {source}"),
    ("offer_title", "Title: {title}"),
    ("offer_price", "Price: {price}"),
    ("offer_info", "Info: {extra}"),
    ("offer_link", "Link: {link}"),
    (
        "lang_prompt",
        "Language settings:\nUse /lang <code> to switch.\nAvailable: {locales}",
    ),
    ("lang_updated", "Language updated to {locale}."),
    ("lang_unknown", "Unknown language. Available: {locales}"),
];

const ES: Catalog = &[
    ("paused", "Pausado. Escribe 'resume' o /menu para continuar."),
    ("resumed", "Reanudado. Seguire buscando."),
    ("status", "Buscando {search_term} en {target_city}."),
    (
        "config_confirmed",
        "Configuracion confirmada.\n\nModo: {persona}\nBusqueda: {search_term}\nCiudad: {target_city}\nPrecio maximo: {price_max}\n\nEstoy buscando ahora y avisare cuando encuentre resultados.",
    ),
    ("ai_ready", "Genial. Empezare a buscar ahora."),
    ("ai_missing_fields", "Necesito el producto, el precio maximo y la ciudad."),
    ("ai_fallback_starting", "Entendido. Empezare la busqueda."),
    (
        "ai_fallback_prompt",
        "Dime el producto, el precio maximo y la ciudad. Ejemplo: 'PlayStation 5 hasta 2500 en Sao Paulo'.",
    ),
    ("offer_default_title", "Anuncio"),
    ("offer_found", "ENCONTRADO:"),
    ("offer_source", "Fuente: {source}"),
    ("offer_title", "Titulo: {title}"),
    ("offer_price", "Precio: {price}"),
    ("offer_info", "Info: {extra}"),
    ("offer_link", "Enlace: {link}"),
    (
        "lang_prompt",
        "Configuracion de idioma:\nUsa /lang <code> para cambiar.\nDisponibles: {locales}",
    ),
    ("lang_updated", "Idioma actualizado a {locale}."),
    ("lang_unknown", "Idioma desconocido. Disponibles: {locales}"),
];

const FR: Catalog = &[
    ("paused", "En pause. Tapez 'resume' ou /menu pour continuer."),
    ("resumed", "Reprise. Je continue la recherche."),
    ("status", "Recherche de {search_term} a {target_city}."),
    (
        "config_confirmed",
        "Configuration confirmee.\n\nMode : {persona}\nRecherche : {search_term}\nVille : {target_city}\nPrix max : {price_max}\n\nJe cherche maintenant et vous alerterai en cas de resultat.",
    ),
    ("ai_ready", "Parfait. Je demarre la recherche."),
    ("ai_missing_fields", "J'ai besoin du produit, du prix max et de la ville."),
    ("ai_fallback_starting", "Compris. Je lance la recherche."),
    (
        "ai_fallback_prompt",
        "Indiquez le produit, le prix max et la ville. Exemple : 'PlayStation 5 jusqu'a 2500 a Sao Paulo'.",
    ),
    ("offer_default_title", "Annonce"),
    ("offer_found", "TROUVE :"),
    ("offer_source", "Source : {source}"),
    ("offer_title", "Titre : {title}"),
    ("offer_price", "Prix : {price}"),
    ("offer_info", "Info : {extra}"),
    ("offer_link", "Lien : {link}"),
    (
        "lang_prompt",
        "Parametres de langue :\nUtilisez /lang <code> pour changer.\nDisponibles : {locales}",
    ),
    ("lang_updated", "Langue mise a jour : {locale}."),
    ("lang_unknown", "Langue inconnue. Disponibles : {locales}"),
];

const DE: Catalog = &[
    ("paused", "Pausiert. Tippe 'resume' oder /menu, um fortzufahren."),
    ("resumed", "Fortgesetzt. Ich suche weiter."),
    ("status", "Suche nach {search_term} in {target_city}."),
    (
        "config_confirmed",
        "Konfiguration bestaetigt.\n\nModus: {persona}\nSuche: {search_term}\nStadt: {target_city}\nMax. Preis: {price_max}\n\nIch suche jetzt und melde mich bei Treffern.",
    ),
    ("ai_ready", "Super. Ich starte die Suche."),
    ("ai_missing_fields", "Ich brauche Produkt, Hoechstpreis und Stadt."),
    ("ai_fallback_starting", "Alles klar. Ich starte die Suche."),
    (
        "ai_fallback_prompt",
        "Nenne Produkt, Hoechstpreis und Stadt. Beispiel: 'PlayStation 5 bis 2500 in Sao Paulo'.",
    ),
    ("offer_default_title", "Anzeige"),
    ("offer_found", "GEFUNDEN:"),
    ("offer_source", "Quelle: {source}"),
    ("offer_title", "Titel: {title}"),
    ("offer_price", "Preis: {price}"),
    ("offer_info", "Info: {extra}"),
    ("offer_link", "Link: {link}"),
    (
        "lang_prompt",
        "Spracheinstellungen:\nNutze /lang <code> zum Wechseln.\nVerfuegbar: {locales}",
    ),
    ("lang_updated", "Sprache geaendert auf {locale}."),
    ("lang_unknown", "Unbekannte Sprache. Verfuegbar: {locales}"),
];

const IT: Catalog = &[
    ("paused", "In pausa. Digita 'resume' o /menu per continuare."),
    ("resumed", "Ripreso. Continuero a cercare."),
    ("status", "Cerco {search_term} a {target_city}."),
    (
        "config_confirmed",
        "Configurazione confermata.\n\nModalita: {persona}\nRicerca: {search_term}\nCitta: {target_city}\nPrezzo massimo: {price_max}\n\nSto cercando e ti avvisero quando trovo risultati.",
    ),
    ("ai_ready", "Perfetto. Avvio la ricerca."),
    ("ai_missing_fields", "Mi servono prodotto, prezzo massimo e citta."),
    ("ai_fallback_starting", "Ok. Avvio la ricerca."),
    (
        "ai_fallback_prompt",
        "Dimmi prodotto, prezzo massimo e citta. Esempio: 'PlayStation 5 fino a 2500 a Sao Paulo'.",
    ),
    ("offer_default_title", "Annuncio"),
    ("offer_found", "TROVATO:"),
    ("offer_source", "Fonte: {source}"),
    ("offer_title", "Titolo: {title}"),
    ("offer_price", "Prezzo: {price}"),
    ("offer_info", "Info: {extra}"),
    ("offer_link", "Link: {link}"),
    (
        "lang_prompt",
        "Impostazioni lingua:\nUsa /lang <code> per cambiare.\nDisponibili: {locales}",
    ),
    ("lang_updated", "Lingua aggiornata a {locale}."),
    ("lang_unknown", "Lingua sconosciuta. Disponibili: {locales}"),
];

const PT_BR: Catalog = &[
    ("paused", "Pausado. Digite 'resume' ou /menu para continuar."),
    ("resumed", "Retomado. Vou continuar buscando."),
    ("status", "Procurando por {search_term} em {target_city}."),
    (
        "config_confirmed",
        "Configuracao confirmada.\n\nModo: {persona}\nBusca: {search_term}\nCidade: {target_city}\nPreco maximo: {price_max}\n\nEstou buscando agora e avisarei quando encontrar resultados.",
    ),
    ("ai_ready", "Otimo. Vou comecar a buscar agora."),
    ("ai_missing_fields", "Preciso do produto, do preco maximo e da cidade."),
    ("ai_fallback_starting", "Entendido. Vou iniciar a busca."),
    (
        "ai_fallback_prompt",
        "Me diga o produto, o preco maximo e a cidade. Exemplo: 'PlayStation 5 ate 2500 em Sao Paulo'.",
    ),
    ("offer_default_title", "Anuncio"),
    ("offer_found", "ENCONTRADO:"),
    ("offer_source", "Fonte: {source}"),
    ("offer_title", "Titulo: {title}"),
    ("offer_price", "Preco: {price}"),
    ("offer_info", "Info: {extra}"),
    ("offer_link", "Link: {link}"),
    (
        "lang_prompt",
        "Configuracoes de idioma:\nUse /lang <code> para trocar.\nDisponiveis: {locales}",
    ),
    ("lang_updated", "Idioma atualizado para {locale}."),
    ("lang_unknown", "Idioma desconhecido. Disponiveis: {locales}"),
];

fn catalog(locale: &str) -> Catalog {
    match locale {
        "es" => ES,
        "fr" => FR,
        "de" => DE,
        "it" => IT,
        "pt-BR" => PT_BR,
        _ => EN,
    }
}

fn lookup(catalog: Catalog, key: &str) -> Option<&'static str> {
    catalog.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn alias(lowered: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, locale)| *locale)
}

fn supported(candidate: &str) -> Option<&'static str> {
    SUPPORTED_LOCALES.iter().copied().find(|l| *l == candidate)
}

fn fallback(default: &str) -> String {
    supported(default).unwrap_or(DEFAULT_LOCALE).to_string()
}

/// Map any locale spelling (`pt_BR`, `EN-us`, `de-AT`) to a supported
/// locale, or to `default` when nothing matches.
pub fn normalize_locale(locale: Option<&str>, default: &str) -> String {
    let Some(raw) = locale.map(str::trim).filter(|l| !l.is_empty()) else {
        return fallback(default);
    };
    let raw = raw.replace('_', "-");
    let lowered = raw.to_lowercase();

    if let Some(found) = alias(&lowered) {
        return found.to_string();
    }
    if let Some((base, _)) = lowered.split_once('-') {
        if let Some(found) = alias(base) {
            return found.to_string();
        }
    }
    supported(&raw)
        .or_else(|| supported(&lowered))
        .map(str::to_string)
        .unwrap_or_else(|| fallback(default))
}

/// Pick the locale for a chat: stored preference first, then the
/// platform-reported language, then `default`.
pub fn select_locale(preferred: Option<&str>, language_code: Option<&str>, default: &str) -> String {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.filter(|s| !s.trim().is_empty())
    }
    if let Some(preferred) = non_empty(preferred) {
        return normalize_locale(Some(preferred), default);
    }
    if let Some(code) = non_empty(language_code) {
        return normalize_locale(Some(code), default);
    }
    normalize_locale(Some(default), DEFAULT_LOCALE)
}

/// Strict resolution for explicit user requests (`/lang xx`).
///
/// Unlike [`normalize_locale`] this never falls back: unknown input is
/// `None`, and region variants like `de-AT` are not accepted.
pub fn resolve_locale(requested: &str) -> Option<String> {
    let raw = requested.trim();
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_lowercase().replace('_', "-");
    alias(&lowered)
        .or_else(|| supported(raw))
        .or_else(|| supported(&lowered))
        .map(str::to_string)
}

/// English display name of a locale.
pub fn language_name(locale: Option<&str>) -> &'static str {
    let normalized = normalize_locale(locale, DEFAULT_LOCALE);
    LOCALE_NAMES
        .iter()
        .find(|(code, _)| *code == normalized)
        .map(|(_, name)| *name)
        .unwrap_or("English")
}

/// Comma-separated list of supported locales, for help messages.
pub fn available_locales() -> String {
    SUPPORTED_LOCALES.join(", ")
}

/// Look up `key` in `locale` and fill `{placeholders}` from `args`.
pub fn t(locale: Option<&str>, key: &str, args: &[(&str, &str)]) -> String {
    let normalized = normalize_locale(locale, DEFAULT_LOCALE);
    let template = lookup(catalog(&normalized), key)
        .or_else(|| lookup(EN, key))
        .unwrap_or(key);

    let mut message = template.to_string();
    for (name, value) in args {
        message = message.replace(&format!("{{{name}}}"), value);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_locale_variants() {
        assert_eq!(normalize_locale(Some("pt_BR"), "en"), "pt-BR");
        assert_eq!(normalize_locale(Some("PT"), "en"), "pt-BR");
        assert_eq!(normalize_locale(Some("EN-us"), "en"), "en");
        assert_eq!(normalize_locale(Some("de-AT"), "en"), "de");
        assert_eq!(normalize_locale(Some("xx"), "es"), "es");
        assert_eq!(normalize_locale(Some("xx"), "zz"), "en");
        assert_eq!(normalize_locale(None, "fr"), "fr");
    }

    #[test]
    fn test_resolve_locale_is_strict() {
        assert_eq!(resolve_locale("pt-br").as_deref(), Some("pt-BR"));
        assert_eq!(resolve_locale("IT").as_deref(), Some("it"));
        assert_eq!(resolve_locale("de-AT"), None);
        assert_eq!(resolve_locale("klingon"), None);
        assert_eq!(resolve_locale(""), None);
    }

    #[test]
    fn test_select_locale_precedence() {
        assert_eq!(select_locale(Some("fr"), Some("de"), "en"), "fr");
        assert_eq!(select_locale(None, Some("de-DE"), "en"), "de");
        assert_eq!(select_locale(Some(""), None, "it"), "it");
        assert_eq!(select_locale(Some("  "), Some(" "), "es"), "es");
        assert_eq!(select_locale(Some(" "), Some("pt_BR"), "en"), "pt-BR");
    }

    #[test]
    fn test_language_name() {
        assert_eq!(language_name(Some("pt")), "Portuguese (Brazil)");
        assert_eq!(language_name(None), "English");
    }

    #[test]
    fn test_every_locale_has_every_key() {
        for locale in SUPPORTED_LOCALES {
            for (key, _) in EN {
                assert!(
                    lookup(catalog(locale), key).is_some(),
                    "{locale} is missing {key}"
                );
            }
        }
    }

    #[test]
    fn test_t_formats_and_falls_back() {
        assert_eq!(t(Some("en"), "offer_price", &[("price", "$ 100")]), "Price: $ 100");
        assert_eq!(t(Some("de"), "offer_price", &[("price", "$ 100")]), "Preis: $ 100");
        assert_eq!(t(Some("xx"), "offer_found", &[]), "FOUND:");
        assert_eq!(t(Some("en"), "no_such_key", &[]), "no_such_key");
        assert_eq!(t(Some("en"), "offer_link", &[]), "Link: {link}");
    }
}
