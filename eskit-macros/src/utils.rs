use syn::{Attribute, Path};

/// 合并派生列表：已有 `#[derive(...)]` 中缺失的项以一个新的 derive 属性追加。
/// 按路径末段的标识符比较，避免 `serde::Serialize` 与 `Serialize` 重复。
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) {
    let mut existing: Vec<String> = Vec::new();

    for attr in attrs.iter() {
        if attr.path().is_ident("derive") {
            let _ = attr.parse_nested_meta(|meta| {
                if let Some(seg) = meta.path.segments.last() {
                    existing.push(seg.ident.to_string());
                }
                Ok(())
            });
        }
    }

    let missing: Vec<Path> = required
        .into_iter()
        .filter(|path| {
            path.segments
                .last()
                .is_none_or(|seg| !existing.contains(&seg.ident.to_string()))
        })
        .collect();

    if !missing.is_empty() {
        attrs.push(syn::parse_quote! { #[derive(#(#missing),*)] });
    }
}
