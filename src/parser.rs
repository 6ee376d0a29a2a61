//! Flattening of detail documents into the fixed warrant record.
//!
//! The detail endpoint returns deeply nested, inconsistently shaped JSON;
//! every field is read through a path lookup that yields `None` on any
//! missing key or out-of-range index. The output column order is
//! the wire contract with the storage layer's bulk-load mechanism and
//! must never vary between records.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Row-size ceiling of the storage layer. Records past it drop their
/// free-text decision summary instead of being truncated arbitrarily.
const MAX_RECORD_BYTES: usize = 60_000;

/// One step of a deep lookup path.
#[derive(Debug, Clone, Copy)]
pub enum Seg<'a> {
    Key(&'a str),
    Idx(usize),
}

/// Walk a path into a JSON value, returning `None` instead of failing on
/// any missing key, wrong type or out-of-range index.
pub fn pluck<'v>(value: &'v Value, path: &[Seg]) -> Option<&'v Value> {
    let mut current = value;
    for seg in path {
        current = match seg {
            Seg::Key(key) => current.get(key)?,
            Seg::Idx(idx) => current.get(idx)?,
        };
    }
    Some(current)
}

/// Pluck a scalar as a trimmed string.
fn pluck_string(value: &Value, path: &[Seg]) -> Option<String> {
    match pluck(value, path)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Upper-case a name and fold diacritics to plain ASCII. Characters with
/// no ASCII equivalent are dropped, like an NFKD decomposition with
/// non-ASCII marks discarded.
pub fn format_name(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .filter_map(fold_char)
        .collect()
}

fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'Ç' => 'C',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ñ' => 'N',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ý' => 'Y',
        c if c.is_ascii() => c,
        _ => return None,
    };
    Some(folded)
}

/// Column order of the parsed warrant table. Contract with the storage
/// layer; `ParsedWarrant::to_row` emits fields in exactly this order.
pub const COLUMNS: [&str; 39] = [
    "id",
    "numero_mandado_prisao",
    "tipo_peca",
    "status",
    "numero_processo",
    "id_pessoa",
    "nome",
    "nome_mae",
    "nome_pai",
    "data_nascimento",
    "alcunha",
    "pais_nascimento",
    "municipio_nascimento",
    "uf_nascimento",
    "sexo",
    "registro_judicial_individual",
    "numero_mandado_prisao_anterior",
    "magistrado",
    "tipo_prisao",
    "tempo_pena_ano",
    "tempo_pena_mes",
    "tempo_pena_dia",
    "regime_prisional",
    "orgao_expedidor",
    "orgao_expedidor_municipio",
    "orgao_expedidor_uf",
    "orgao_judiciario",
    "orgao_judiciario_municipio",
    "orgao_judiciario_uf",
    "sintese_decisao",
    "data_expedicao",
    "data_validade",
    "data_raspagem",
    "data_visto_em",
    "cpf",
    "metodo_identificacao_cpf",
    "tipificacao",
    "tipificacoes",
    "recaptura",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedWarrant {
    pub id: Option<String>,
    pub numero_mandado_prisao: Option<String>,
    pub tipo_peca: Option<String>,
    pub status: Option<String>,
    pub numero_processo: Option<String>,
    pub id_pessoa: Option<String>,
    pub nome: Option<String>,
    pub nome_mae: Option<String>,
    pub nome_pai: Option<String>,
    pub data_nascimento: Option<String>,
    pub alcunha: Option<String>,
    pub pais_nascimento: Option<String>,
    pub municipio_nascimento: Option<String>,
    pub uf_nascimento: Option<String>,
    pub sexo: Option<String>,
    pub registro_judicial_individual: Option<String>,
    pub numero_mandado_prisao_anterior: Option<String>,
    pub magistrado: Option<String>,
    pub tipo_prisao: Option<String>,
    pub tempo_pena_ano: String,
    pub tempo_pena_mes: String,
    pub tempo_pena_dia: String,
    pub regime_prisional: Option<String>,
    pub orgao_expedidor: Option<String>,
    pub orgao_expedidor_municipio: Option<String>,
    pub orgao_expedidor_uf: Option<String>,
    pub orgao_judiciario: Option<String>,
    pub orgao_judiciario_municipio: Option<String>,
    pub orgao_judiciario_uf: Option<String>,
    pub sintese_decisao: Option<String>,
    pub data_expedicao: Option<String>,
    pub data_validade: Option<String>,
    pub data_raspagem: String,
    pub data_visto_em: String,
    /// Filled by a downstream identification job, never by this pipeline.
    pub cpf: Option<String>,
    pub metodo_identificacao_cpf: Option<String>,
    pub tipificacao: Option<String>,
    pub tipificacoes: Option<String>,
    pub recaptura: Option<String>,
}

impl ParsedWarrant {
    /// Flatten one detail document.
    pub fn from_detail(scrape_date: NaiveDate, last_seen: NaiveDate, detail: &Value) -> Self {
        use Seg::{Idx, Key};

        let name = |path: &[Seg]| pluck_string(detail, path).map(|s| format_name(&s));
        let field = |path: &[Seg]| pluck_string(detail, path);

        let data_nascimento = field(&[
            Key("pessoa"),
            Key("dataNascimento"),
            Idx(0),
            Key("dataNascimento"),
        ])
        .map(|date| date.split('/').rev().collect::<Vec<_>>().join("-"));

        let tipificacoes = pluck(detail, &[Key("tipificacaoPenal")])
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
            .map(|items| {
                let labels: Vec<Option<String>> = items
                    .iter()
                    .map(|item| pluck_string(item, &[Key("rotulo")]))
                    .collect();
                serde_json::to_string(&labels).unwrap_or_default()
            });

        let recaptura = match pluck(detail, &[Key("recaptura")]) {
            Some(Value::String(s)) => s.chars().next().map(String::from),
            Some(Value::Array(items)) => items.first().and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }),
            _ => None,
        };

        let sentence_part = |key: &'static str| {
            pluck_string(detail, &[Key(key)]).unwrap_or_else(|| "0".to_string())
        };

        let mut record = Self {
            id: field(&[Key("id")]),
            numero_mandado_prisao: field(&[Key("numeroPeca")]),
            tipo_peca: field(&[Key("tipoPeca"), Key("id")]),
            status: field(&[Key("status"), Key("descricao")]),
            numero_processo: field(&[Key("numeroProcesso")]),
            id_pessoa: field(&[Key("pessoa"), Key("id")]),
            nome: name(&[Key("pessoa"), Key("outrosNomes"), Idx(0), Key("nome")]),
            nome_mae: name(&[Key("pessoa"), Key("nomeMae"), Idx(0), Key("nome")]),
            nome_pai: name(&[Key("pessoa"), Key("nomePai"), Idx(0), Key("nome")]),
            data_nascimento,
            alcunha: field(&[Key("pessoa"), Key("outrasAlcunhas"), Idx(0), Key("nome")]),
            pais_nascimento: field(&[
                Key("pessoa"),
                Key("dadosGeraisPessoa"),
                Key("paisNascimento"),
                Key("nome"),
            ]),
            municipio_nascimento: field(&[
                Key("pessoa"),
                Key("dadosGeraisPessoa"),
                Key("naturalidade"),
                Key("nome"),
            ]),
            uf_nascimento: field(&[
                Key("pessoa"),
                Key("dadosGeraisPessoa"),
                Key("naturalidade"),
                Key("uf"),
                Key("sigla"),
            ]),
            sexo: field(&[
                Key("pessoa"),
                Key("dadosGeraisPessoa"),
                Key("sexo"),
                Key("descricao"),
            ]),
            registro_judicial_individual: field(&[Key("numeroIndividuo")]),
            numero_mandado_prisao_anterior: field(&[Key("numeroPecaAnterior")]),
            magistrado: name(&[Key("magistrado")]),
            tipo_prisao: field(&[Key("especiePrisao")]),
            tempo_pena_ano: sentence_part("tempoPenaAno"),
            tempo_pena_mes: sentence_part("tempoPenaMes"),
            tempo_pena_dia: sentence_part("tempoPenaDia"),
            regime_prisional: field(&[Key("regimePrisional")]),
            orgao_expedidor: field(&[Key("orgaoUsuarioCriador"), Key("nome")]),
            orgao_expedidor_municipio: field(&[
                Key("orgaoUsuarioCriador"),
                Key("municipio"),
                Key("nome"),
            ]),
            orgao_expedidor_uf: field(&[
                Key("orgaoUsuarioCriador"),
                Key("municipio"),
                Key("uf"),
                Key("sigla"),
            ]),
            orgao_judiciario: field(&[Key("orgaoJudiciario"), Key("nome")]),
            orgao_judiciario_municipio: field(&[
                Key("orgaoJudiciario"),
                Key("municipio"),
                Key("nome"),
            ]),
            orgao_judiciario_uf: field(&[
                Key("orgaoJudiciario"),
                Key("municipio"),
                Key("uf"),
                Key("sigla"),
            ]),
            sintese_decisao: field(&[Key("sinteseDecisao")])
                .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ")),
            data_expedicao: field(&[Key("dataExpedicao")])
                .map(|s| s.chars().take(10).collect()),
            data_validade: field(&[Key("dataValidade")]),
            data_raspagem: scrape_date.format("%Y-%m-%d").to_string(),
            data_visto_em: last_seen.format("%Y-%m-%d").to_string(),
            cpf: None,
            metodo_identificacao_cpf: None,
            tipificacao: None,
            tipificacoes,
            recaptura,
        };

        if record.serialized_len() > MAX_RECORD_BYTES {
            record.sintese_decisao = Some(String::new());
        }

        record
    }

    fn serialized_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// Emit the record as a fixed-order row (see `COLUMNS`). Missing
    /// values become empty fields.
    pub fn to_row(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            opt(&self.id),
            opt(&self.numero_mandado_prisao),
            opt(&self.tipo_peca),
            opt(&self.status),
            opt(&self.numero_processo),
            opt(&self.id_pessoa),
            opt(&self.nome),
            opt(&self.nome_mae),
            opt(&self.nome_pai),
            opt(&self.data_nascimento),
            opt(&self.alcunha),
            opt(&self.pais_nascimento),
            opt(&self.municipio_nascimento),
            opt(&self.uf_nascimento),
            opt(&self.sexo),
            opt(&self.registro_judicial_individual),
            opt(&self.numero_mandado_prisao_anterior),
            opt(&self.magistrado),
            opt(&self.tipo_prisao),
            self.tempo_pena_ano.clone(),
            self.tempo_pena_mes.clone(),
            self.tempo_pena_dia.clone(),
            opt(&self.regime_prisional),
            opt(&self.orgao_expedidor),
            opt(&self.orgao_expedidor_municipio),
            opt(&self.orgao_expedidor_uf),
            opt(&self.orgao_judiciario),
            opt(&self.orgao_judiciario_municipio),
            opt(&self.orgao_judiciario_uf),
            opt(&self.sintese_decisao),
            opt(&self.data_expedicao),
            opt(&self.data_validade),
            self.data_raspagem.clone(),
            self.data_visto_em.clone(),
            opt(&self.cpf),
            opt(&self.metodo_identificacao_cpf),
            opt(&self.tipificacao),
            opt(&self.tipificacoes),
            opt(&self.recaptura),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dates() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
        )
    }

    #[test]
    fn pluck_never_fails_on_missing_paths() {
        let value = json!({"a": {"b": [{"c": 1}]}});
        use Seg::{Idx, Key};

        assert_eq!(pluck(&value, &[Key("a"), Key("b"), Idx(0), Key("c")]), Some(&json!(1)));
        assert_eq!(pluck(&value, &[Key("a"), Key("missing")]), None);
        assert_eq!(pluck(&value, &[Key("a"), Key("b"), Idx(5)]), None);
        assert_eq!(pluck(&value, &[Key("a"), Idx(0)]), None);
    }

    #[test]
    fn names_are_folded_and_uppercased() {
        assert_eq!(format_name("João da Conceição"), "JOAO DA CONCEICAO");
        assert_eq!(format_name("André Müller"), "ANDRE MULLER");
    }

    #[test]
    fn birth_date_is_flipped() {
        let (scrape, seen) = dates();
        let detail = json!({
            "pessoa": {"dataNascimento": [{"dataNascimento": "15/03/1990"}]}
        });
        let record = ParsedWarrant::from_detail(scrape, seen, &detail);
        assert_eq!(record.data_nascimento.as_deref(), Some("1990-03-15"));
    }

    #[test]
    fn offense_labels_serialize_as_json_array() {
        let (scrape, seen) = dates();
        let detail = json!({
            "tipificacaoPenal": [{"rotulo": "furto"}, {"rotulo": "roubo"}]
        });
        let record = ParsedWarrant::from_detail(scrape, seen, &detail);
        assert_eq!(record.tipificacoes.as_deref(), Some(r#"["furto","roubo"]"#));

        let empty = ParsedWarrant::from_detail(scrape, seen, &json!({"tipificacaoPenal": []}));
        assert_eq!(empty.tipificacoes, None);
    }

    #[test]
    fn missing_nests_yield_null_fields() {
        let (scrape, seen) = dates();
        let record = ParsedWarrant::from_detail(scrape, seen, &json!({"id": 77}));

        assert_eq!(record.id.as_deref(), Some("77"));
        assert_eq!(record.nome, None);
        assert_eq!(record.uf_nascimento, None);
        assert_eq!(record.tempo_pena_ano, "0");
        assert_eq!(record.tempo_pena_dia, "0");
    }

    #[test]
    fn expedition_date_is_truncated_to_day() {
        let (scrape, seen) = dates();
        let detail = json!({"dataExpedicao": "2023-11-07T14:02:55.000"});
        let record = ParsedWarrant::from_detail(scrape, seen, &detail);
        assert_eq!(record.data_expedicao.as_deref(), Some("2023-11-07"));
    }

    #[test]
    fn oversized_record_drops_decision_summary() {
        let (scrape, seen) = dates();
        let detail = json!({
            "id": 1,
            "sinteseDecisao": "x".repeat(70_000),
        });
        let record = ParsedWarrant::from_detail(scrape, seen, &detail);
        assert_eq!(record.sintese_decisao.as_deref(), Some(""));
        // Everything else survives.
        assert_eq!(record.id.as_deref(), Some("1"));
    }

    #[test]
    fn row_matches_column_contract() {
        let (scrape, seen) = dates();
        let record = ParsedWarrant::from_detail(scrape, seen, &json!({}));
        let row = record.to_row();
        assert_eq!(row.len(), COLUMNS.len());
        // data_raspagem sits at its contracted position.
        let idx = COLUMNS.iter().position(|c| *c == "data_raspagem").unwrap();
        assert_eq!(row[idx], "2024-06-01");
    }

    #[test]
    fn full_document_round_trip() {
        let (scrape, seen) = dates();
        let detail = json!({
            "id": 4242,
            "numeroPeca": "0001.2023",
            "tipoPeca": {"id": 1, "descricao": "Mandado de Prisao"},
            "status": {"id": 2, "descricao": "Pendente de Cumprimento"},
            "numeroProcesso": "0000123-45.2023.8.26.0050",
            "pessoa": {
                "id": 99,
                "outrosNomes": [{"nome": "José Çilva"}],
                "nomeMae": [{"nome": "maria da penha"}],
                "nomePai": [{"nome": "João Pé"}],
                "dataNascimento": [{"dataNascimento": "15/03/1990"}],
                "outrasAlcunhas": [{"nome": "Zeca"}],
                "dadosGeraisPessoa": {
                    "paisNascimento": {"nome": "Brasil"},
                    "naturalidade": {"nome": "Santos", "uf": {"sigla": "SP"}},
                    "sexo": {"descricao": "Masculino"}
                }
            },
            "numeroIndividuo": "RJI-7",
            "numeroPecaAnterior": "0001.2022",
            "magistrado": "Ana Lúcia",
            "especiePrisao": "Preventiva",
            "tempoPenaAno": 5,
            "tempoPenaMes": 2,
            "tempoPenaDia": 10,
            "regimePrisional": "Fechado",
            "orgaoUsuarioCriador": {
                "nome": "1a Vara Criminal",
                "municipio": {"nome": "Santos", "uf": {"sigla": "SP"}}
            },
            "orgaoJudiciario": {
                "nome": "TJSP",
                "municipio": {"nome": "São Paulo", "uf": {"sigla": "SP"}}
            },
            "sinteseDecisao": "Decreto  a prisão \n preventiva",
            "dataExpedicao": "2023-11-07T14:02:55.000",
            "dataValidade": "2043-11-07",
            "tipificacaoPenal": [{"rotulo": "furto"}, {"rotulo": "roubo"}],
            "recaptura": "Sim"
        });

        let record = ParsedWarrant::from_detail(scrape, seen, &detail);

        assert_eq!(record.id.as_deref(), Some("4242"));
        assert_eq!(record.numero_mandado_prisao.as_deref(), Some("0001.2023"));
        assert_eq!(record.tipo_peca.as_deref(), Some("1"));
        assert_eq!(record.status.as_deref(), Some("Pendente de Cumprimento"));
        assert_eq!(record.id_pessoa.as_deref(), Some("99"));
        assert_eq!(record.nome.as_deref(), Some("JOSE CILVA"));
        assert_eq!(record.nome_mae.as_deref(), Some("MARIA DA PENHA"));
        assert_eq!(record.nome_pai.as_deref(), Some("JOAO PE"));
        assert_eq!(record.data_nascimento.as_deref(), Some("1990-03-15"));
        assert_eq!(record.alcunha.as_deref(), Some("Zeca"));
        assert_eq!(record.pais_nascimento.as_deref(), Some("Brasil"));
        assert_eq!(record.municipio_nascimento.as_deref(), Some("Santos"));
        assert_eq!(record.uf_nascimento.as_deref(), Some("SP"));
        assert_eq!(record.sexo.as_deref(), Some("Masculino"));
        assert_eq!(record.registro_judicial_individual.as_deref(), Some("RJI-7"));
        assert_eq!(record.magistrado.as_deref(), Some("ANA LUCIA"));
        assert_eq!(record.tipo_prisao.as_deref(), Some("Preventiva"));
        assert_eq!(record.tempo_pena_ano, "5");
        assert_eq!(record.tempo_pena_mes, "2");
        assert_eq!(record.tempo_pena_dia, "10");
        assert_eq!(record.regime_prisional.as_deref(), Some("Fechado"));
        assert_eq!(record.orgao_expedidor.as_deref(), Some("1a Vara Criminal"));
        assert_eq!(record.orgao_expedidor_uf.as_deref(), Some("SP"));
        assert_eq!(record.orgao_judiciario.as_deref(), Some("TJSP"));
        assert_eq!(record.orgao_judiciario_municipio.as_deref(), Some("São Paulo"));
        assert_eq!(
            record.sintese_decisao.as_deref(),
            Some("Decreto a prisão preventiva")
        );
        assert_eq!(record.data_expedicao.as_deref(), Some("2023-11-07"));
        assert_eq!(record.data_validade.as_deref(), Some("2043-11-07"));
        assert_eq!(record.data_raspagem, "2024-06-01");
        assert_eq!(record.data_visto_em, "2024-06-02");
        assert_eq!(record.cpf, None);
        assert_eq!(record.tipificacao, None);
        assert_eq!(record.tipificacoes.as_deref(), Some(r#"["furto","roubo"]"#));
        assert_eq!(record.recaptura.as_deref(), Some("S"));
    }
}
